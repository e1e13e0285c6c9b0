//! Consumer registry with change-record predicates

use crate::consumer::ChangeConsumer;
use std::sync::Arc;
use strata_store::{ChangeAction, ChangeRecord};

/// Predicate selecting which change records a consumer receives.
///
/// An unset field matches everything, so `ChangePredicate::any()` receives
/// the whole stream.
#[derive(Debug, Clone, Default)]
pub struct ChangePredicate {
    table: Option<String>,
    actions: Option<Vec<ChangeAction>>,
}

impl ChangePredicate {
    /// Match every record.
    pub fn any() -> Self {
        Self::default()
    }

    /// Match records from one logical table.
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            actions: None,
        }
    }

    /// Restrict to a set of actions.
    pub fn with_actions(mut self, actions: impl IntoIterator<Item = ChangeAction>) -> Self {
        self.actions = Some(actions.into_iter().collect());
        self
    }

    /// Whether this predicate selects the record.
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        if let Some(table) = &self.table
            && table != &record.table
        {
            return false;
        }
        if let Some(actions) = &self.actions
            && !actions.contains(&record.action)
        {
            return false;
        }
        true
    }
}

struct Binding {
    predicate: ChangePredicate,
    consumer: Arc<dyn ChangeConsumer>,
}

/// Explicit mapping from change-record predicates to consumers.
///
/// Populated at startup and handed to the dispatcher; no runtime
/// reflection, no ambient registration.
#[derive(Default)]
pub struct ConsumerRegistry {
    bindings: Vec<Binding>,
}

impl ConsumerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a consumer to the records selected by `predicate`.
    pub fn register(
        mut self,
        predicate: ChangePredicate,
        consumer: Arc<dyn ChangeConsumer>,
    ) -> Self {
        self.bindings.push(Binding {
            predicate,
            consumer,
        });
        self
    }

    /// Consumers whose predicate matches the record.
    pub fn consumers_for(&self, record: &ChangeRecord) -> Vec<Arc<dyn ChangeConsumer>> {
        self.bindings
            .iter()
            .filter(|binding| binding.predicate.matches(record))
            .map(|binding| binding.consumer.clone())
            .collect()
    }

    /// Number of registered bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no consumer is registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
