//! End-to-end tests for the command pipeline: validator, publisher,
//! retry coordinator, gateway and change-stream delivery.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use strata_commands::{
    Command, CommandError, CommandGateway, CommandPublisher, RetryCoordinator, RetryPolicy,
};
use strata_store::{
    CommandVersion, InMemoryItemStore, Item, ItemDraft, ItemKey, ItemStore, StoreError,
};
use strata_stream::{
    ChangeConsumer, ChangeDispatcher, ChangePredicate, ConsumerError, ConsumerRegistry,
};

fn key() -> ItemKey {
    ItemKey::new("acme", "order-1")
}

fn draft() -> ItemDraft {
    ItemDraft::new(key(), "id-1", "acme")
        .with_code("ORD")
        .with_name("Order")
        .with_attributes(serde_json::json!({"total": 10, "state": "open"}))
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(4))
}

/// Store wrapper that rejects the first `conflicts` conditional writes.
struct ConflictingStore {
    inner: InMemoryItemStore,
    remaining_conflicts: AtomicU32,
}

impl ConflictingStore {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: InMemoryItemStore::new("orders"),
            remaining_conflicts: AtomicU32::new(conflicts),
        }
    }

    fn steal_write(&self, expected: u64) -> Option<StoreError> {
        self.remaining_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| StoreError::VersionConflict {
                expected,
                actual: expected + 1,
            })
    }
}

#[async_trait]
impl ItemStore for ConflictingStore {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        self.inner.get(key).await
    }

    async fn conditional_put(
        &self,
        draft: ItemDraft,
        expected_version: u64,
    ) -> Result<Item, StoreError> {
        if let Some(err) = self.steal_write(expected_version) {
            return Err(err);
        }
        self.inner.conditional_put(draft, expected_version).await
    }

    async fn conditional_remove(
        &self,
        key: &ItemKey,
        expected_version: u64,
    ) -> Result<Item, StoreError> {
        if let Some(err) = self.steal_write(expected_version) {
            return Err(err);
        }
        self.inner.conditional_remove(key, expected_version).await
    }

    async fn list(&self, partition_key: &str) -> Result<Vec<Item>, StoreError> {
        self.inner.list(partition_key).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_explicit_commands_have_exactly_one_winner() {
    let store = Arc::new(InMemoryItemStore::new("orders"));
    let publisher = CommandPublisher::new(store.clone());

    publisher
        .publish(&Command::replace(draft(), CommandVersion::First))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..24 {
        let publisher = publisher.clone();
        tasks.push(tokio::spawn(async move {
            publisher
                .publish(&Command::replace(
                    draft().with_name(format!("writer-{i}")),
                    CommandVersion::Explicit(1),
                ))
                .await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(item) => {
                assert_eq!(item.version, 2);
                wins += 1;
            }
            Err(err) if err.is_conflict() => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(conflicts, 23);
    assert_eq!(store.get(&key()).await.unwrap().unwrap().version, 2);
}

#[tokio::test]
async fn first_succeeds_only_while_absent() {
    let store = Arc::new(InMemoryItemStore::new("orders"));
    let publisher = CommandPublisher::new(store);

    let created = publisher
        .publish(&Command::replace(draft(), CommandVersion::First))
        .await
        .unwrap();
    assert_eq!(created.version, 1);

    let err = publisher
        .publish(&Command::replace(draft(), CommandVersion::First))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.status_code(), 409);
}

#[tokio::test(flavor = "multi_thread")]
async fn latest_never_raises_a_conflict() {
    let store = Arc::new(InMemoryItemStore::new("orders"));
    // Latest bypasses version checks, but a writer can still lose the raw
    // CAS race between its read and its write; the coordinator absorbs
    // those, so with enough budget every Latest submission lands.
    let coordinator = Arc::new(RetryCoordinator::with_policy(
        store.clone(),
        fast_policy().with_max_retries(100),
    ));

    coordinator
        .submit(&Command::replace(draft(), CommandVersion::First))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            coordinator
                .submit(&Command::replace(
                    draft().with_name(format!("latest-{i}")),
                    CommandVersion::Latest,
                ))
                .await
        }));
    }

    for task in tasks {
        task.await.unwrap().expect("latest command must succeed");
    }

    // 1 create + 16 latest writers, each bumping by exactly 1
    assert_eq!(store.get(&key()).await.unwrap().unwrap().version, 17);
}

#[tokio::test]
async fn change_records_are_one_to_one_with_accepted_mutations() {
    let store = Arc::new(InMemoryItemStore::new("orders"));
    let feed = store.change_feed();
    let coordinator = RetryCoordinator::with_policy(store.clone(), fast_policy());

    coordinator
        .submit(&Command::replace(draft(), CommandVersion::First))
        .await
        .unwrap();
    coordinator
        .submit(&Command::merge(
            key(),
            "acme",
            serde_json::json!({"state": "closed"}),
            CommandVersion::Latest,
        ))
        .await
        .unwrap();

    // A hopeless command retries and fails without emitting anything
    let err = coordinator
        .submit(&Command::replace(draft(), CommandVersion::Explicit(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::ConflictRetriesExhausted { .. }));

    let mut rx = feed.take_receiver().unwrap();
    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    assert_eq!(count, 2);
}

#[tokio::test]
async fn coordinator_recovers_from_transient_conflicts() {
    // 2 stolen writes, budget of 4 attempts: third attempt wins
    let store = Arc::new(ConflictingStore::new(2));
    let coordinator = RetryCoordinator::with_policy(
        store,
        fast_policy().with_max_retries(4),
    );

    let item = coordinator
        .submit(&Command::replace(draft(), CommandVersion::First))
        .await
        .unwrap();
    assert_eq!(item.version, 1);
}

#[tokio::test]
async fn coordinator_surfaces_terminal_conflict_on_exhaustion() {
    // Every attempt in the budget conflicts
    let store = Arc::new(ConflictingStore::new(4));
    let coordinator = RetryCoordinator::with_policy(
        store,
        fast_policy().with_max_retries(3),
    );

    let err = coordinator
        .submit(&Command::replace(draft(), CommandVersion::First))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::ConflictRetriesExhausted { attempts: 3 }
    ));
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn validation_errors_are_never_retried() {
    let store = Arc::new(ConflictingStore::new(0));
    let coordinator = RetryCoordinator::with_policy(store, fast_policy());

    // Merge against an absent item is fatal, not a conflict
    let err = coordinator
        .submit(&Command::merge(
            key(),
            "acme",
            serde_json::json!({"state": "closed"}),
            CommandVersion::Latest,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Validation(_)));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn deadline_yields_timeout_not_conflict() {
    // Conflicts forever, with real backoff so the deadline fires first
    let store = Arc::new(ConflictingStore::new(u32::MAX));
    let coordinator = RetryCoordinator::with_policy(
        store,
        RetryPolicy::default()
            .with_max_retries(u32::MAX)
            .with_base_delay(Duration::from_millis(20))
            .with_max_delay(Duration::from_millis(20)),
    );

    let err = coordinator
        .submit_with_timeout(
            &Command::replace(draft(), CommandVersion::First),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::TimeoutExceeded));
    assert_eq!(err.status_code(), 408);
}

#[tokio::test]
async fn stale_reader_loses_to_committed_writer() {
    // Item at version 2; A declares 2 and wins, B declared 2 earlier and loses
    let store = Arc::new(InMemoryItemStore::new("orders"));
    let publisher = CommandPublisher::new(store.clone());

    publisher
        .publish(&Command::replace(draft(), CommandVersion::First))
        .await
        .unwrap();
    publisher
        .publish(&Command::replace(draft(), CommandVersion::Explicit(1)))
        .await
        .unwrap();

    let a = publisher
        .publish(&Command::replace(
            draft().with_name("A"),
            CommandVersion::Explicit(2),
        ))
        .await
        .unwrap();
    assert_eq!(a.version, 3);

    let b = publisher
        .publish(&Command::replace(
            draft().with_name("B"),
            CommandVersion::Explicit(2),
        ))
        .await
        .unwrap_err();
    assert!(b.is_conflict());
}

/// Read model deduplicating on record identity: redelivery is a no-op.
struct OrderReadModel {
    applied: std::sync::Mutex<std::collections::HashSet<uuid::Uuid>>,
    live: std::sync::Mutex<std::collections::HashMap<ItemKey, u64>>,
}

impl OrderReadModel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            applied: std::sync::Mutex::new(std::collections::HashSet::new()),
            live: std::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn mark(&self, record: &strata_store::ChangeRecord) -> bool {
        self.applied.lock().unwrap().insert(record.record_id)
    }

    fn applied_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    fn live_len(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

#[async_trait]
impl ChangeConsumer for OrderReadModel {
    fn name(&self) -> &str {
        "order-read-model"
    }

    async fn on_created(&self, record: &strata_store::ChangeRecord) -> Result<(), ConsumerError> {
        if self.mark(record)
            && let Some(item) = &record.after
        {
            self.live
                .lock()
                .unwrap()
                .insert(item.key.clone(), item.version);
        }
        Ok(())
    }

    async fn on_updated(&self, record: &strata_store::ChangeRecord) -> Result<(), ConsumerError> {
        self.on_created(record).await
    }

    async fn on_deleted(&self, record: &strata_store::ChangeRecord) -> Result<(), ConsumerError> {
        if self.mark(record) {
            self.live.lock().unwrap().remove(&record.key);
        }
        Ok(())
    }
}

#[tokio::test]
async fn full_pipeline_syncs_the_read_model() {
    let store = Arc::new(InMemoryItemStore::new("orders"));
    let gateway = CommandGateway::with_policy(store.clone(), fast_policy());

    let read_model = OrderReadModel::new();
    let registry = ConsumerRegistry::new()
        .register(ChangePredicate::for_table("orders"), read_model.clone());
    let dispatcher = Arc::new(ChangeDispatcher::new(registry));
    let feed = store.change_feed().take_receiver().unwrap();
    let runner = tokio::spawn(dispatcher.clone().run(feed));

    gateway
        .publish_sync(Command::replace(draft(), CommandVersion::First))
        .await
        .unwrap();
    let ack = gateway.publish_partial_update_async(
        key(),
        "acme",
        serde_json::json!({"state": "shipped"}),
    );
    ack.completion.await.unwrap().unwrap();
    gateway
        .publish_sync(Command::remove(key(), "acme", CommandVersion::Latest))
        .await
        .unwrap();

    // Delivery is asynchronous; give the per-key worker time to drain
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Create, merge, remove: three records applied, nothing left live
    assert_eq!(read_model.applied_count(), 3);
    assert_eq!(read_model.live_len(), 0);
    assert!(dispatcher.dead_letters().is_empty());

    runner.abort();
}
