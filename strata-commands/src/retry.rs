//! Conflict retry with exponential backoff and jitter

use crate::command::{Command, CommandError};
use crate::publisher::CommandPublisher;
use std::sync::Arc;
use std::time::Duration;
use strata_store::{Item, ItemStore};
use tracing::{debug, warn};

/// Backoff policy for conflict retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Cap applied before jitter
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Set the attempt budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Backoff before retry number `retry` (zero-based).
    ///
    /// `min(max_delay, base_delay * 2^retry)` plus a uniform jitter in
    /// `[0, 0.1 * delay)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        use rand::Rng;

        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.min(31)));
        let capped = exponential.min(self.max_delay);
        let jitter = capped.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
        capped + jitter
    }
}

/// Wraps the validator + publisher cycle with bounded conflict retries.
///
/// Only version mismatches and write conflicts are retried; on each attempt
/// the publisher re-reads the current item, so the delta is reapplied
/// against the fresh base. Validation and storage errors return immediately.
pub struct RetryCoordinator<S: ItemStore> {
    publisher: CommandPublisher<S>,
    policy: RetryPolicy,
}

impl<S: ItemStore> RetryCoordinator<S> {
    /// Coordinator with the default policy.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    /// Coordinator with a custom policy.
    pub fn with_policy(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self {
            publisher: CommandPublisher::new(store),
            policy,
        }
    }

    /// The policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit a command, retrying conflicts up to the policy's budget.
    ///
    /// On exhaustion returns [`CommandError::ConflictRetriesExhausted`],
    /// never an indefinite loop.
    pub async fn submit(&self, command: &Command) -> Result<Item, CommandError> {
        let mut attempt: u32 = 1;

        loop {
            match self.publisher.publish(command).await {
                Ok(item) => {
                    if attempt > 1 {
                        debug!(
                            command_id = %command.command_id,
                            attempt,
                            "command succeeded after retry"
                        );
                    }
                    return Ok(item);
                }
                Err(err) if err.is_conflict() => {
                    if attempt >= self.policy.max_retries {
                        warn!(
                            command_id = %command.command_id,
                            attempts = attempt,
                            "conflict retries exhausted"
                        );
                        return Err(CommandError::ConflictRetriesExhausted { attempts: attempt });
                    }

                    let delay = self.policy.delay_for(attempt - 1);
                    debug!(
                        command_id = %command.command_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "conflict, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Submit with a caller deadline.
    ///
    /// When the deadline elapses the loop is aborted and
    /// [`CommandError::TimeoutExceeded`] is surfaced instead of a conflict
    /// error. An already-issued conditional write is not rolled back.
    pub async fn submit_with_timeout(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Item, CommandError> {
        match tokio::time::timeout(timeout, self.submit(command)).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::TimeoutExceeded),
        }
    }
}

impl<S: ItemStore> Clone for RetryCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
            policy: self.policy.clone(),
        }
    }
}
