//! Version resolution and command shape validation

use crate::command::{Command, CommandError, Delta};
use strata_store::{CommandVersion, Item, VERSION_FIRST};

/// Resolve a declared version against the current item.
///
/// Pure function: returns the expected version to pass to the store's
/// conditional write, or the mismatch it detected.
///
/// - `First` is valid only when no item exists.
/// - `Latest` always resolves to whatever is current (absence resolves to
///   [`VERSION_FIRST`], i.e. upsert). Two concurrent `Latest` commands may
///   both succeed sequentially, each overwriting the other's base state.
/// - `Explicit(v)` is valid only when the stored version equals `v`;
///   absence counts as version 0, so `Explicit(0)` behaves like `First`.
pub fn resolve_version(
    declared: CommandVersion,
    current: Option<&Item>,
) -> Result<u64, CommandError> {
    let actual = current.map(|item| item.version).unwrap_or(VERSION_FIRST);

    match declared {
        CommandVersion::First => {
            if actual == VERSION_FIRST {
                Ok(VERSION_FIRST)
            } else {
                Err(CommandError::VersionMismatch {
                    declared: VERSION_FIRST,
                    actual,
                })
            }
        }
        CommandVersion::Latest => Ok(actual),
        CommandVersion::Explicit(declared) => {
            if actual == declared {
                Ok(declared)
            } else {
                Err(CommandError::VersionMismatch { declared, actual })
            }
        }
    }
}

/// Validate command shape.
///
/// Shape violations are fatal: they are returned immediately and never
/// retried.
pub fn validate(command: &Command) -> Result<(), CommandError> {
    if command.key.partition_key.is_empty() {
        return Err(CommandError::Validation(
            "partition key must not be empty".to_string(),
        ));
    }
    if command.key.sort_key.is_empty() {
        return Err(CommandError::Validation(
            "sort key must not be empty".to_string(),
        ));
    }
    if command.tenant_code.is_empty() {
        return Err(CommandError::Validation(
            "tenant code must not be empty".to_string(),
        ));
    }

    match &command.delta {
        Delta::Replace(draft) => {
            if draft.key != command.key {
                return Err(CommandError::Validation(format!(
                    "draft key {} does not match command key {}",
                    draft.key, command.key
                )));
            }
            if draft.tenant_code != command.tenant_code {
                return Err(CommandError::Validation(
                    "draft tenant does not match command tenant".to_string(),
                ));
            }
        }
        Delta::Merge(payload) => {
            if !payload.is_object() {
                return Err(CommandError::Validation(
                    "merge payload must be a JSON object".to_string(),
                ));
            }
        }
        Delta::Remove => {
            if command.declared_version == CommandVersion::First {
                return Err(CommandError::Validation(
                    "cannot remove an item that was never created".to_string(),
                ));
            }
        }
    }

    Ok(())
}
