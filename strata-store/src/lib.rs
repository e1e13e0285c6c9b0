//! Versioned Item Store for Strata
//!
//! This crate provides key-value storage with optimistic concurrency.
//!
//! ## Features
//!
//! - **Versioned items** - Every mutation bumps the item version by exactly 1
//! - **Conditional writes** - Compare-and-swap on the stored version
//! - **Change records** - Exactly one record per accepted mutation
//! - **Change feed** - Ordered, buffered handoff to downstream dispatchers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata_store::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryItemStore::new("orders");
//!
//!     let draft = ItemDraft::new(ItemKey::new("acme", "order-1"), "id-1", "acme")
//!         .with_name("First order")
//!         .with_attributes(serde_json::json!({"total": 42}));
//!
//!     // Create (stored version becomes 1)
//!     let item = store.conditional_put(draft, VERSION_FIRST).await?;
//!     assert_eq!(item.version, 1);
//!
//!     // A stale writer loses
//!     let stale = ItemDraft::from(item.clone());
//!     assert!(store.conditional_put(stale, 0).await.is_err());
//!
//!     Ok(())
//! }
//! ```

pub mod change;
pub mod item;
pub mod store;

pub use change::{ChangeAction, ChangeFeed, ChangeRecord};
pub use item::{CommandVersion, Item, ItemDraft, ItemKey, VERSION_FIRST};
pub use store::{InMemoryItemStore, ItemStore, StoreError};
