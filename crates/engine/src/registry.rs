//! Executor registry: maps a transaction type tag to its
//! execute/compensate capability pair.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::ExecutorError;
use crate::event::Transaction;

/// The capability pair behind one transaction type.
///
/// `execute` returns the structured result the coordinator persists on the
/// transaction. `compensate` logically reverses a prior execution and may
/// return an updated result. Both must be idempotent: the coordinator retries
/// execution and may re-run compensation, so repeated calls with the same
/// transaction id must not duplicate ledger effects.
#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    async fn execute(&self, tx: &Transaction) -> Result<JsonValue, ExecutorError>;

    async fn compensate(&self, tx: &Transaction) -> Result<Option<JsonValue>, ExecutorError>;
}

/// Thread-safe map from type tag (e.g. `wallet.transfer`) to executor.
///
/// Registrations happen at startup and rarely after; lookups happen on every
/// transaction dispatch, hence the reader-preferring lock.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn TransactionExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for a type tag. Re-registering the same tag
    /// replaces the previous executor.
    pub fn register(&self, kind: impl Into<String>, executor: Arc<dyn TransactionExecutor>) {
        let kind = kind.into();
        let mut executors = self.executors.write().unwrap_or_else(|e| e.into_inner());
        executors.insert(kind, executor);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TransactionExecutor>> {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        executors.get(kind).cloned()
    }

    /// Snapshot of the current registrations.
    pub fn snapshot(&self) -> HashMap<String, Arc<dyn TransactionExecutor>> {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        executors.clone()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let executors = self.executors.read().unwrap_or_else(|e| e.into_inner());
        let mut kinds: Vec<&String> = executors.keys().collect();
        kinds.sort();
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}
