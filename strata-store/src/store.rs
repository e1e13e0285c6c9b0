//! Versioned item store

use crate::change::{ChangeFeed, ChangeRecord};
use crate::item::{Item, ItemDraft, ItemKey, VERSION_FIRST};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::debug;

/// Versioned item store.
///
/// Implement this trait to provide custom storage (e.g. DynamoDB, Postgres).
/// The only synchronization primitive the command pipeline relies on is the
/// conditional write: it must be atomic with respect to concurrent writers
/// on the same key. Cross-key operations are fully parallel.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Load the current item for a key.
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError>;

    /// Write `draft` iff the stored version equals `expected_version`.
    ///
    /// Absence counts as version [`VERSION_FIRST`], so passing
    /// `VERSION_FIRST` means "create". On success the item is stored at
    /// `expected_version + 1` and exactly one change record is enqueued
    /// before returning. A rejected write enqueues nothing.
    async fn conditional_put(
        &self,
        draft: ItemDraft,
        expected_version: u64,
    ) -> Result<Item, StoreError>;

    /// Remove the item iff the stored version equals `expected_version`.
    ///
    /// Emits a `Remove` change record carrying the final image.
    async fn conditional_remove(
        &self,
        key: &ItemKey,
        expected_version: u64,
    ) -> Result<Item, StoreError>;

    /// List live items under a partition key.
    async fn list(&self, partition_key: &str) -> Result<Vec<Item>, StoreError>;
}

/// Store error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory item store (for testing/development).
///
/// The per-key compare-and-swap happens inside the map's entry guard, so
/// compare, write and change-record emission are atomic as a unit.
#[derive(Clone)]
pub struct InMemoryItemStore {
    /// Logical table name carried on emitted change records
    table: String,

    /// Items indexed by key
    items: Arc<DashMap<ItemKey, Item>>,

    /// Change feed fed by successful mutations
    feed: Arc<ChangeFeed>,
}

impl InMemoryItemStore {
    /// Create a new store for a logical table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            items: Arc::new(DashMap::new()),
            feed: Arc::new(ChangeFeed::new()),
        }
    }

    /// The change feed this store emits into.
    pub fn change_feed(&self) -> Arc<ChangeFeed> {
        self.feed.clone()
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Clear all items.
    pub fn clear(&self) {
        self.items.clear();
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        Ok(self.items.get(key).map(|entry| entry.value().clone()))
    }

    async fn conditional_put(
        &self,
        draft: ItemDraft,
        expected_version: u64,
    ) -> Result<Item, StoreError> {
        let key = draft.key.clone();

        match self.items.entry(key) {
            Entry::Occupied(mut occupied) => {
                let actual = occupied.get().version;
                if actual != expected_version {
                    return Err(StoreError::VersionConflict {
                        expected: expected_version,
                        actual,
                    });
                }

                let before = occupied.get().clone();
                let item = draft.into_item(expected_version + 1);
                occupied.insert(item.clone());

                debug!(
                    key = %item.key,
                    version = item.version,
                    "item updated"
                );
                self.feed
                    .emit(ChangeRecord::modify(&self.table, before, item.clone()));
                Ok(item)
            }
            Entry::Vacant(vacant) => {
                if expected_version != VERSION_FIRST {
                    return Err(StoreError::VersionConflict {
                        expected: expected_version,
                        actual: VERSION_FIRST,
                    });
                }

                let item = draft.into_item(VERSION_FIRST + 1);
                vacant.insert(item.clone());

                debug!(key = %item.key, "item created");
                self.feed
                    .emit(ChangeRecord::insert(&self.table, item.clone()));
                Ok(item)
            }
        }
    }

    async fn conditional_remove(
        &self,
        key: &ItemKey,
        expected_version: u64,
    ) -> Result<Item, StoreError> {
        match self.items.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let actual = occupied.get().version;
                if actual != expected_version {
                    return Err(StoreError::VersionConflict {
                        expected: expected_version,
                        actual,
                    });
                }

                let (_, item) = occupied.remove_entry();
                debug!(key = %item.key, version = item.version, "item removed");
                self.feed
                    .emit(ChangeRecord::remove(&self.table, item.clone()));
                Ok(item)
            }
            Entry::Vacant(_) => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn list(&self, partition_key: &str) -> Result<Vec<Item>, StoreError> {
        Ok(self
            .items
            .iter()
            .filter(|entry| entry.key().partition_key == partition_key)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
