//! Change consumer trait

use async_trait::async_trait;
use strata_store::{ChangeAction, ChangeRecord};

/// Consumer error
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("consumer failed: {0}")]
    Failed(String),

    #[error("downstream sync failed: {0}")]
    Sync(String),
}

/// Downstream consumer of change records (event handlers, read-model sync).
///
/// Delivery is at-least-once: the same record may arrive again after a
/// partial failure, so implementations must be idempotent, keyed by item
/// identity plus version. Consumers own their downstream state and never
/// mutate items.
#[async_trait]
pub trait ChangeConsumer: Send + Sync {
    /// Consumer name, used in logs and dead letters.
    fn name(&self) -> &str;

    /// An item was created.
    async fn on_created(&self, record: &ChangeRecord) -> Result<(), ConsumerError>;

    /// An item was updated.
    async fn on_updated(&self, record: &ChangeRecord) -> Result<(), ConsumerError>;

    /// An item was deleted.
    async fn on_deleted(&self, record: &ChangeRecord) -> Result<(), ConsumerError>;
}

/// Route a record to the consumer callback matching its action.
pub(crate) async fn deliver(
    consumer: &dyn ChangeConsumer,
    record: &ChangeRecord,
) -> Result<(), ConsumerError> {
    match record.action {
        ChangeAction::Insert => consumer.on_created(record).await,
        ChangeAction::Modify => consumer.on_updated(record).await,
        ChangeAction::Remove => consumer.on_deleted(record).await,
    }
}
