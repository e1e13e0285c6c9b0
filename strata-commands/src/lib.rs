//! Command pipeline for Strata
//!
//! This crate turns intended mutations into accepted store writes under
//! optimistic concurrency.
//!
//! ## Features
//!
//! - **Version resolution** - `First` / `Latest` / `Explicit(n)` resolved by
//!   a pure function against the current item
//! - **Conditional publishing** - at most one accepted mutation per
//!   conflicting pair of commands
//! - **Bounded retries** - exponential backoff with jitter for transient
//!   conflicts, caller deadlines, terminal conflict errors
//! - **Gateway surface** - `publish_sync`, `publish_async`, partial updates
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata_commands::*;
//! use strata_store::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryItemStore::new("orders"));
//!     let gateway = CommandGateway::new(store);
//!
//!     let draft = ItemDraft::new(ItemKey::new("acme", "order-1"), "id-1", "acme")
//!         .with_attributes(serde_json::json!({"total": 42}));
//!
//!     // Create
//!     let item = gateway
//!         .publish_sync(Command::replace(draft, CommandVersion::First))
//!         .await?;
//!     assert_eq!(item.version, 1);
//!
//!     // Fire-and-forget partial update
//!     let ack = gateway.publish_partial_update_async(
//!         ItemKey::new("acme", "order-1"),
//!         "acme",
//!         serde_json::json!({"state": "shipped"}),
//!     );
//!     assert_eq!(ack.status.status_code(), 202);
//!
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod gateway;
pub mod publisher;
pub mod retry;
pub mod validator;

pub use command::{Command, CommandError, Delta};
pub use gateway::{Ack, AckStatus, CommandGateway};
pub use publisher::CommandPublisher;
pub use retry::{RetryCoordinator, RetryPolicy};
pub use validator::{resolve_version, validate};
