//! Change Stream Dispatch for Strata
//!
//! This crate delivers the store's change records to registered consumers.
//!
//! ## Features
//!
//! - **Consumer registry** - explicit predicate → consumer bindings,
//!   populated at startup
//! - **At-least-once delivery** - bounded per-consumer retries, then
//!   dead-lettering; failures never reach the mutating caller
//! - **Ordering** - same-key records arrive in production order, different
//!   keys proceed in parallel
//! - **Isolation** - a slow or failing consumer never blocks the others
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata_store::*;
//! use strata_stream::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryItemStore::new("orders");
//!
//!     let registry = ConsumerRegistry::new()
//!         .register(ChangePredicate::for_table("orders"), Arc::new(OrderReadModel::new()));
//!     let dispatcher = Arc::new(ChangeDispatcher::new(registry));
//!
//!     let feed = store.change_feed().take_receiver().unwrap();
//!     tokio::spawn(dispatcher.clone().run(feed));
//!
//!     // ... mutate through the command pipeline; the read model follows.
//! }
//! ```

pub mod consumer;
pub mod dispatcher;
pub mod registry;

pub use consumer::{ChangeConsumer, ConsumerError};
pub use dispatcher::{
    ChangeDispatcher, DeadLetter, DeliveryReport, DeliveryState, DispatcherConfig,
};
pub use registry::{ChangePredicate, ConsumerRegistry};
