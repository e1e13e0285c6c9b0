//! Command model and error taxonomy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_store::{CommandVersion, ItemDraft, ItemKey, StoreError};
use thiserror::Error;
use uuid::Uuid;

/// An intended mutation of a single item.
///
/// Commands are immutable once built; they produce exactly one accepted
/// mutation or fail with a conflict/validation error. No partial application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique command id
    pub command_id: Uuid,

    /// Target item key
    pub key: ItemKey,

    /// Owning tenant
    pub tenant_code: String,

    /// Version the command declares against the target
    pub declared_version: CommandVersion,

    /// Payload delta
    pub delta: Delta,

    /// When the command was built
    pub issued_at: DateTime<Utc>,
}

/// Payload delta a command applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Delta {
    /// Replace the full payload
    Replace(ItemDraft),

    /// Shallow-merge an object into the current attributes (partial update)
    Merge(serde_json::Value),

    /// Delete the item
    Remove,
}

impl Command {
    /// Full-replace command. The target key and tenant come from the draft.
    pub fn replace(draft: ItemDraft, declared_version: CommandVersion) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            key: draft.key.clone(),
            tenant_code: draft.tenant_code.clone(),
            declared_version,
            delta: Delta::Replace(draft),
            issued_at: Utc::now(),
        }
    }

    /// Partial-update command merging `payload` into the current attributes.
    pub fn merge(
        key: ItemKey,
        tenant_code: impl Into<String>,
        payload: serde_json::Value,
        declared_version: CommandVersion,
    ) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            key,
            tenant_code: tenant_code.into(),
            declared_version,
            delta: Delta::Merge(payload),
            issued_at: Utc::now(),
        }
    }

    /// Delete command.
    pub fn remove(
        key: ItemKey,
        tenant_code: impl Into<String>,
        declared_version: CommandVersion,
    ) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            key,
            tenant_code: tenant_code.into(),
            declared_version,
            delta: Delta::Remove,
            issued_at: Utc::now(),
        }
    }
}

/// Command error
#[derive(Debug, Error)]
pub enum CommandError {
    /// Malformed command or payload. Fatal, never retried.
    #[error("invalid command: {0}")]
    Validation(String),

    /// Declared explicit version is stale (seen at validation read).
    #[error("declared version {declared} does not match current version {actual}")]
    VersionMismatch { declared: u64, actual: u64 },

    /// Conditional write lost a race after validator approval.
    #[error("conditional write rejected: expected version {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// Retry budget spent on conflicts.
    #[error("conflict retries exhausted after {attempts} attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    /// Caller-supplied deadline elapsed inside the retry loop.
    #[error("command deadline exceeded")]
    TimeoutExceeded,

    /// Storage-layer failure.
    #[error("storage failure: {0}")]
    Store(String),
}

impl CommandError {
    /// HTTP-style status code for the embedding service.
    ///
    /// Version mismatches and write conflicts are the same externally
    /// visible class (409); the variants stay distinct for diagnostics.
    pub fn status_code(&self) -> u16 {
        match self {
            CommandError::Validation(_) => 400,
            CommandError::VersionMismatch { .. } => 409,
            CommandError::VersionConflict { .. } => 409,
            CommandError::ConflictRetriesExhausted { .. } => 409,
            CommandError::TimeoutExceeded => 408,
            CommandError::Store(_) => 500,
        }
    }

    /// Whether a retry coordinator may recover from this error by
    /// re-reading and resubmitting.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CommandError::VersionMismatch { .. } | CommandError::VersionConflict { .. }
        )
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { expected, actual } => {
                CommandError::VersionConflict { expected, actual }
            }
            StoreError::NotFound(key) => CommandError::Store(format!("item not found: {key}")),
            StoreError::Storage(msg) => CommandError::Store(msg),
        }
    }
}
