//! Item model and version sentinels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stored version that denotes "not yet created".
///
/// A successful creation moves an item from `VERSION_FIRST` to `1`.
pub const VERSION_FIRST: u64 = 0;

/// Key identifying a single item within a tenant-scoped namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    /// Partition key
    pub partition_key: String,

    /// Sort key
    pub sort_key: String,
}

impl ItemKey {
    /// Create a new item key.
    pub fn new(partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.sort_key)
    }
}

/// A stored item.
///
/// At most one live item exists per key. `version` strictly increases by 1
/// on every successful mutation; the store owns version assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item key
    pub key: ItemKey,

    /// Unique identifier
    pub id: String,

    /// Business code
    pub code: String,

    /// Display name
    pub name: String,

    /// Item type discriminator
    pub item_type: String,

    /// Owning tenant
    pub tenant_code: String,

    /// Current version (>= 1 for live items)
    pub version: u64,

    /// Arbitrary structured payload
    pub attributes: serde_json::Value,
}

/// Everything of an [`Item`] except its version.
///
/// Callers submit drafts; the store assigns the version on a successful
/// conditional write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDraft {
    /// Item key
    pub key: ItemKey,

    /// Unique identifier
    pub id: String,

    /// Business code
    pub code: String,

    /// Display name
    pub name: String,

    /// Item type discriminator
    pub item_type: String,

    /// Owning tenant
    pub tenant_code: String,

    /// Arbitrary structured payload
    pub attributes: serde_json::Value,
}

impl ItemDraft {
    /// Create a new draft.
    pub fn new(key: ItemKey, id: impl Into<String>, tenant_code: impl Into<String>) -> Self {
        Self {
            key,
            id: id.into(),
            code: String::new(),
            name: String::new(),
            item_type: String::new(),
            tenant_code: tenant_code.into(),
            attributes: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the business code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the item type.
    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }

    /// Set the attribute payload.
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    /// Materialize the draft at a given version.
    pub fn into_item(self, version: u64) -> Item {
        Item {
            key: self.key,
            id: self.id,
            code: self.code,
            name: self.name,
            item_type: self.item_type,
            tenant_code: self.tenant_code,
            version,
            attributes: self.attributes,
        }
    }
}

impl From<Item> for ItemDraft {
    fn from(item: Item) -> Self {
        Self {
            key: item.key,
            id: item.id,
            code: item.code,
            name: item.name,
            item_type: item.item_type,
            tenant_code: item.tenant_code,
            attributes: item.attributes,
        }
    }
}

/// Version a command declares against its target item.
///
/// Closed set consumed by the pure resolution function in the command layer:
/// `First` creates, `Latest` applies to whatever is current (last write
/// wins), `Explicit(n)` demands an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CommandVersion {
    /// Valid only when no item exists yet
    First,

    /// Skip conflict detection, apply to the current version
    Latest,

    /// Valid only when the stored version matches exactly
    Explicit(u64),
}
