//! Change records and the change feed

use crate::item::{Item, ItemKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Kind of mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeAction {
    /// Item created
    Insert,

    /// Item updated
    Modify,

    /// Item deleted
    Remove,
}

/// Record of one accepted mutation.
///
/// Created atomically with the store write, exactly one per mutation,
/// never modified afterwards. Delivery downstream is at-least-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Unique record id
    pub record_id: Uuid,

    /// Logical table the mutation happened in
    pub table: String,

    /// Key of the mutated item
    pub key: ItemKey,

    /// Owning tenant
    pub tenant_code: String,

    /// Mutation kind
    pub action: ChangeAction,

    /// Image before the mutation (absent for inserts)
    pub before: Option<Item>,

    /// Image after the mutation (absent for removes)
    pub after: Option<Item>,

    /// When the mutation was accepted
    pub occurred_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Record for a created item.
    pub fn insert(table: impl Into<String>, after: Item) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            table: table.into(),
            key: after.key.clone(),
            tenant_code: after.tenant_code.clone(),
            action: ChangeAction::Insert,
            before: None,
            after: Some(after),
            occurred_at: Utc::now(),
        }
    }

    /// Record for an updated item.
    pub fn modify(table: impl Into<String>, before: Item, after: Item) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            table: table.into(),
            key: after.key.clone(),
            tenant_code: after.tenant_code.clone(),
            action: ChangeAction::Modify,
            before: Some(before),
            after: Some(after),
            occurred_at: Utc::now(),
        }
    }

    /// Record for a removed item.
    pub fn remove(table: impl Into<String>, before: Item) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            table: table.into(),
            key: before.key.clone(),
            tenant_code: before.tenant_code.clone(),
            action: ChangeAction::Remove,
            before: Some(before),
            after: None,
            occurred_at: Utc::now(),
        }
    }
}

/// Ordered feed of change records emitted by a store.
///
/// The store holds the sending side; a dispatcher takes the receiving side
/// exactly once. Records buffer until the receiver is taken, so no mutation
/// is ever lost between store startup and dispatcher startup.
pub struct ChangeFeed {
    sender: mpsc::UnboundedSender<ChangeRecord>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ChangeRecord>>>,
}

impl ChangeFeed {
    /// Create a new feed.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Emit a record into the feed.
    pub fn emit(&self, record: ChangeRecord) {
        // Send only fails when the receiver was taken and dropped; the
        // mutation has already committed at that point, so the record is
        // dropped with the closed feed.
        let _ = self.sender.send(record);
    }

    /// Take the receiving side. Returns `None` after the first call.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<ChangeRecord>> {
        self.receiver.lock().expect("change feed lock poisoned").take()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
