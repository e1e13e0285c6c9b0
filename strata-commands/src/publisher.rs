//! Command publisher: validator + conditional store write

use crate::command::{Command, CommandError, Delta};
use crate::validator::{resolve_version, validate};
use std::sync::Arc;
use strata_store::{Item, ItemDraft, ItemStore, StoreError, VERSION_FIRST};
use tracing::debug;

/// Applies one command to the store.
///
/// Orchestrates validate → read → resolve → conditional write. A write-time
/// conflict (the race between the validation read and the write) is surfaced
/// to the caller as [`CommandError::VersionConflict`]; retries belong to the
/// retry coordinator, never here. Of two commands racing on the same key
/// with the same expected version, exactly one conditional write succeeds.
pub struct CommandPublisher<S: ItemStore> {
    store: Arc<S>,
}

impl<S: ItemStore> CommandPublisher<S> {
    /// Create a publisher over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Apply the command. Returns the item as stored, including its new
    /// version (the removed image for delete commands).
    pub async fn publish(&self, command: &Command) -> Result<Item, CommandError> {
        validate(command)?;

        let current = self.store.get(&command.key).await?;
        let expected = resolve_version(command.declared_version, current.as_ref())?;

        debug!(
            command_id = %command.command_id,
            key = %command.key,
            expected,
            "command approved"
        );

        let item = match &command.delta {
            Delta::Replace(draft) => self.store.conditional_put(draft.clone(), expected).await?,
            Delta::Merge(payload) => {
                let Some(base) = current else {
                    return Err(CommandError::Validation(
                        "partial update requires an existing item".to_string(),
                    ));
                };
                let draft = merged_draft(base, payload);
                self.store.conditional_put(draft, expected).await?
            }
            Delta::Remove => {
                if current.is_none() {
                    return Err(CommandError::Validation(
                        "cannot remove an item that does not exist".to_string(),
                    ));
                }
                match self.store.conditional_remove(&command.key, expected).await {
                    Ok(item) => item,
                    // The item was present at the validation read, so a
                    // missing entry here means a concurrent remove won the
                    // race. Same conflict class as any other lost write.
                    Err(StoreError::NotFound(_)) => {
                        return Err(CommandError::VersionConflict {
                            expected,
                            actual: VERSION_FIRST,
                        });
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        Ok(item)
    }
}

impl<S: ItemStore> Clone for CommandPublisher<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

/// Shallow-merge `payload` into the base item's attributes.
///
/// Keys in the payload win; other attributes and the identity fields are
/// carried over unchanged. A non-object base is replaced wholesale.
fn merged_draft(base: Item, payload: &serde_json::Value) -> ItemDraft {
    let mut draft = ItemDraft::from(base);

    match (&mut draft.attributes, payload) {
        (serde_json::Value::Object(attrs), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                attrs.insert(key.clone(), value.clone());
            }
        }
        (attrs, patch) => *attrs = patch.clone(),
    }

    draft
}
