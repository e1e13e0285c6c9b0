//! Command submission surface

use crate::command::{Command, CommandError};
use crate::retry::{RetryCoordinator, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use strata_store::{CommandVersion, Item, ItemKey, ItemStore};
use tokio::sync::oneshot;
use tracing::{error, info};
use uuid::Uuid;

/// Acceptance status for asynchronously submitted commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Command accepted for processing
    Accepted,
}

impl AckStatus {
    /// HTTP-style status code.
    pub fn status_code(&self) -> u16 {
        match self {
            AckStatus::Accepted => 202,
        }
    }
}

/// Immediate acknowledgement for an async submission.
///
/// `completion` resolves once the pipeline finishes; dropping it detaches
/// the caller without cancelling the command.
pub struct Ack {
    /// Id of the accepted command
    pub command_id: Uuid,

    /// Acceptance status
    pub status: AckStatus,

    /// Final pipeline outcome
    pub completion: oneshot::Receiver<Result<Item, CommandError>>,
}

/// External command submission surface.
///
/// Plain composable object: the store and policy are injected at
/// construction, nothing is registered globally.
pub struct CommandGateway<S: ItemStore + 'static> {
    coordinator: Arc<RetryCoordinator<S>>,
    default_timeout: Option<Duration>,
}

impl<S: ItemStore + 'static> CommandGateway<S> {
    /// Gateway with the default retry policy and no deadline.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    /// Gateway with a custom retry policy.
    pub fn with_policy(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self {
            coordinator: Arc::new(RetryCoordinator::with_policy(store, policy)),
            default_timeout: None,
        }
    }

    /// Apply a deadline to every submission.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Submit and wait for the full pipeline: returns the final item (200)
    /// or the terminal error.
    pub async fn publish_sync(&self, command: Command) -> Result<Item, CommandError> {
        self.run(&command).await
    }

    /// Submit without waiting: returns an immediate acknowledgement (202)
    /// while the retry loop runs in a background task.
    pub fn publish_async(&self, command: Command) -> Ack {
        let command_id = command.command_id;
        let (tx, rx) = oneshot::channel();
        let coordinator = self.coordinator.clone();
        let timeout = self.default_timeout;

        info!(command_id = %command_id, key = %command.key, "command accepted");

        tokio::spawn(async move {
            let result = match timeout {
                Some(timeout) => coordinator.submit_with_timeout(&command, timeout).await,
                None => coordinator.submit(&command).await,
            };
            if let Err(err) = &result {
                // The caller only got the acknowledgement; terminal failures
                // go to the observability channel.
                error!(
                    command_id = %command_id,
                    status = err.status_code(),
                    "async command failed: {err}"
                );
            }
            let _ = tx.send(result);
        });

        Ack {
            command_id,
            status: AckStatus::Accepted,
            completion: rx,
        }
    }

    /// Async partial update: merges the payload into the current attributes
    /// instead of replacing them. Applies to whatever version is current.
    pub fn publish_partial_update_async(
        &self,
        key: ItemKey,
        tenant_code: impl Into<String>,
        payload: serde_json::Value,
    ) -> Ack {
        self.publish_async(Command::merge(
            key,
            tenant_code,
            payload,
            CommandVersion::Latest,
        ))
    }

    async fn run(&self, command: &Command) -> Result<Item, CommandError> {
        match self.default_timeout {
            Some(timeout) => self.coordinator.submit_with_timeout(command, timeout).await,
            None => self.coordinator.submit(command).await,
        }
    }
}

impl<S: ItemStore + 'static> Clone for CommandGateway<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            default_timeout: self.default_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::{InMemoryItemStore, ItemDraft};

    fn key() -> ItemKey {
        ItemKey::new("acme", "order-1")
    }

    fn draft() -> ItemDraft {
        ItemDraft::new(key(), "id-1", "acme")
            .with_name("Order")
            .with_attributes(serde_json::json!({"total": 10}))
    }

    #[tokio::test]
    async fn test_publish_sync() {
        let store = Arc::new(InMemoryItemStore::new("orders"));
        let gateway = CommandGateway::new(store);

        let item = gateway
            .publish_sync(Command::replace(draft(), CommandVersion::First))
            .await
            .unwrap();
        assert_eq!(item.version, 1);
    }

    #[tokio::test]
    async fn test_publish_async_acknowledges_then_completes() {
        let store = Arc::new(InMemoryItemStore::new("orders"));
        let gateway = CommandGateway::new(store.clone());

        let ack = gateway.publish_async(Command::replace(draft(), CommandVersion::First));
        assert_eq!(ack.status, AckStatus::Accepted);
        assert_eq!(ack.status.status_code(), 202);

        let item = ack.completion.await.unwrap().unwrap();
        assert_eq!(item.version, 1);
        assert!(store.get(&key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_partial_update_async() {
        let store = Arc::new(InMemoryItemStore::new("orders"));
        let gateway = CommandGateway::new(store);

        gateway
            .publish_sync(Command::replace(draft(), CommandVersion::First))
            .await
            .unwrap();

        let ack = gateway.publish_partial_update_async(
            key(),
            "acme",
            serde_json::json!({"state": "closed"}),
        );
        let item = ack.completion.await.unwrap().unwrap();
        assert_eq!(item.version, 2);
        assert_eq!(item.attributes["state"], "closed");
        assert_eq!(item.attributes["total"], 10);
    }

    #[tokio::test]
    async fn test_async_failure_reaches_completion_handle() {
        let store = Arc::new(InMemoryItemStore::new("orders"));
        let gateway = CommandGateway::new(store);

        gateway
            .publish_sync(Command::replace(draft(), CommandVersion::First))
            .await
            .unwrap();

        // Second creation of the same key mismatches on every attempt and
        // ends as a terminal conflict
        let ack = gateway.publish_async(Command::replace(draft(), CommandVersion::First));
        let err = ack.completion.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            CommandError::ConflictRetriesExhausted { .. }
        ));
        assert_eq!(err.status_code(), 409);
    }
}
