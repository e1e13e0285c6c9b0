//! Change stream dispatcher

use crate::consumer::{ChangeConsumer, deliver};
use crate::registry::ConsumerRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_store::{ChangeRecord, ItemKey};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Delivery lifecycle of a (record, consumer) pair.
///
/// `Pending → Delivering → Delivered`, with `Delivering → Pending` on a
/// consumer failure until the attempt budget is spent, then `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting for a delivery attempt
    Pending,

    /// Attempt in flight
    Delivering,

    /// Consumer acknowledged the record
    Delivered,

    /// Attempt budget spent; record dead-lettered for this consumer
    Dead,
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delivery attempts per (record, consumer) pair
    pub max_delivery_attempts: u32,

    /// Pause between redelivery attempts
    pub redelivery_delay: Duration,

    /// How long a per-key worker may sit with an empty queue before it is
    /// evicted. A later record for the same key spawns a fresh worker.
    pub worker_idle_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 3,
            redelivery_delay: Duration::from_millis(50),
            worker_idle_timeout: Duration::from_secs(60),
        }
    }
}

impl DispatcherConfig {
    /// Set the attempt budget.
    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }

    /// Set the redelivery pause.
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Set the idle eviction period for per-key workers.
    pub fn with_worker_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }
}

/// A (record, consumer) pair whose attempt budget was spent.
///
/// Dead letters are reported through [`ChangeDispatcher::dead_letters`] and
/// the error log, never silently dropped. The originating mutation has
/// already committed and is unaffected.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The undeliverable record
    pub record: ChangeRecord,

    /// Name of the failing consumer
    pub consumer: String,

    /// Attempts made
    pub attempts: u32,

    /// Last error observed
    pub error: String,

    /// When the pair was dead-lettered
    pub dead_at: DateTime<Utc>,
}

/// Per-record delivery outcome, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Consumers that acknowledged the record
    pub delivered: usize,

    /// Consumers dead-lettered for this record
    pub dead: usize,
}

/// Dispatches change records to registered consumers, at least once each.
///
/// Consumers of one record run in parallel; a slow or failing consumer
/// never blocks the others. Records for the same key reach consumers in
/// production order, records for different keys are independent.
pub struct ChangeDispatcher {
    registry: Arc<ConsumerRegistry>,
    config: DispatcherConfig,
    dead_letters: Mutex<Vec<DeadLetter>>,
    workers: DashMap<ItemKey, mpsc::UnboundedSender<ChangeRecord>>,
}

impl ChangeDispatcher {
    /// Dispatcher with the default configuration.
    pub fn new(registry: ConsumerRegistry) -> Self {
        Self::with_config(registry, DispatcherConfig::default())
    }

    /// Dispatcher with a custom configuration.
    pub fn with_config(registry: ConsumerRegistry, config: DispatcherConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            dead_letters: Mutex::new(Vec::new()),
            workers: DashMap::new(),
        }
    }

    /// Deliver one record to every matching consumer, in parallel.
    pub async fn dispatch(&self, record: ChangeRecord) -> DeliveryReport {
        let consumers = self.registry.consumers_for(&record);
        if consumers.is_empty() {
            debug!(key = %record.key, action = ?record.action, "no consumer for record");
            return DeliveryReport::default();
        }

        let mut tasks: Vec<(String, JoinHandle<Result<(), DeadLetter>>)> = Vec::new();
        for consumer in consumers {
            let name = consumer.name().to_string();
            let record = record.clone();
            let config = self.config.clone();
            tasks.push((
                name,
                tokio::spawn(deliver_with_retries(consumer, record, config)),
            ));
        }

        let mut report = DeliveryReport::default();
        for (name, task) in tasks {
            match task.await {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(dead)) => {
                    report.dead += 1;
                    self.report_dead_letter(dead);
                }
                Err(join_err) => {
                    report.dead += 1;
                    self.report_dead_letter(DeadLetter {
                        record: record.clone(),
                        consumer: name,
                        attempts: self.config.max_delivery_attempts,
                        error: format!("consumer task panicked: {join_err}"),
                        dead_at: Utc::now(),
                    });
                }
            }
        }
        report
    }

    /// Consume a change feed until the sending store is dropped.
    ///
    /// Each record is routed to a lazily-spawned worker owning its key, so
    /// same-key records are dispatched sequentially in feed order while
    /// different keys proceed in parallel. Workers whose queue stays empty
    /// for [`DispatcherConfig::worker_idle_timeout`] are evicted, so the
    /// worker map tracks the active key set rather than every key ever seen.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<ChangeRecord>) {
        while let Some(record) = receiver.recv().await {
            self.route(record);
        }
        debug!("change feed closed, dispatcher stopping");
    }

    /// Dead letters accumulated so far.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .expect("dead letter lock poisoned")
            .clone()
    }

    /// Per-key workers currently alive.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn route(self: &Arc<Self>, record: ChangeRecord) {
        let key = record.key.clone();
        let entry = self.workers.entry(key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel::<ChangeRecord>();
            tokio::spawn(worker_loop(self.clone(), key, rx));
            tx
        });

        // The send happens while the map entry is held: eviction removes
        // the entry under the same shard lock after checking the queue is
        // empty, so a worker can never vanish between lookup and send.
        let _ = entry.send(record);
    }

    fn report_dead_letter(&self, dead: DeadLetter) {
        error!(
            consumer = %dead.consumer,
            key = %dead.record.key,
            attempts = dead.attempts,
            "record dead-lettered: {}",
            dead.error
        );
        self.dead_letters
            .lock()
            .expect("dead letter lock poisoned")
            .push(dead);
    }
}

/// Drain one key's queue in feed order, evicting the worker once it idles.
///
/// Eviction removes the map entry via `remove_if`, which holds the shard
/// lock while the queue is checked for stragglers; `route` sends while
/// holding that entry, so a record is either queued before the check (and
/// drained here) or routed to a fresh worker after the removal.
async fn worker_loop(
    dispatcher: Arc<ChangeDispatcher>,
    key: ItemKey,
    mut receiver: mpsc::UnboundedReceiver<ChangeRecord>,
) {
    loop {
        match tokio::time::timeout(dispatcher.config.worker_idle_timeout, receiver.recv()).await {
            Ok(Some(record)) => {
                dispatcher.dispatch(record).await;
            }
            Ok(None) => break,
            Err(_elapsed) => {
                let mut straggler = None;
                let evicted = dispatcher
                    .workers
                    .remove_if(&key, |_, _| match receiver.try_recv() {
                        Ok(record) => {
                            straggler = Some(record);
                            false
                        }
                        Err(_) => true,
                    })
                    .is_some();

                if let Some(record) = straggler {
                    dispatcher.dispatch(record).await;
                } else if evicted {
                    debug!(key = %key, "idle worker evicted");
                    break;
                }
            }
        }
    }
}

/// Run the delivery state machine for one (record, consumer) pair.
async fn deliver_with_retries(
    consumer: Arc<dyn ChangeConsumer>,
    record: ChangeRecord,
    config: DispatcherConfig,
) -> Result<(), DeadLetter> {
    let mut state = DeliveryState::Pending;
    let mut attempts = 0;
    let mut last_error = String::new();

    while state == DeliveryState::Pending {
        state = DeliveryState::Delivering;
        attempts += 1;

        match deliver(consumer.as_ref(), &record).await {
            Ok(()) => {
                state = DeliveryState::Delivered;
                debug!(
                    consumer = consumer.name(),
                    key = %record.key,
                    attempts,
                    "record delivered"
                );
            }
            Err(err) => {
                last_error = err.to_string();
                if attempts < config.max_delivery_attempts {
                    state = DeliveryState::Pending;
                    warn!(
                        consumer = consumer.name(),
                        key = %record.key,
                        attempt = attempts,
                        "delivery failed, record requeued: {last_error}"
                    );
                    tokio::time::sleep(config.redelivery_delay).await;
                } else {
                    state = DeliveryState::Dead;
                }
            }
        }
    }

    match state {
        DeliveryState::Delivered => Ok(()),
        _ => Err(DeadLetter {
            record,
            consumer: consumer.name().to_string(),
            attempts,
            error: last_error,
            dead_at: Utc::now(),
        }),
    }
}
