//! Engine-level error model.

use serde_json::Value as JsonValue;
use thiserror::Error;

use cascade_core::{DomainError, EventId, TransactionId};
use cascade_ledger::{LedgerError, StoreError};

use crate::event::EventState;
use crate::lien::LienError;

/// Failure raised by a transaction executor.
///
/// The engine retries only transient faults; deterministic failures
/// (payload, domain) fail the transaction immediately.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The transaction payload did not parse or failed field validation.
    #[error("invalid payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Lien(#[from] LienError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The executor applied some effects before failing; `result` records
    /// what happened so compensation can unwind it.
    #[error("{message}")]
    Partial { message: String, result: JsonValue },
}

impl ExecutorError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ExecutorError::Store(StoreError::Database(_)) => true,
            ExecutorError::Ledger(e) => e.is_transient(),
            ExecutorError::Lien(LienError::Store(StoreError::Database(_))) => true,
            _ => false,
        }
    }

    /// Partial effects recorded before the failure, if any.
    pub fn partial_result(&self) -> Option<JsonValue> {
        match self {
            ExecutorError::Partial { result, .. } => Some(result.clone()),
            _ => None,
        }
    }
}

/// Failure raised by the event coordinator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("invalid event state {found} (expected {expected})")]
    InvalidEventState { expected: String, found: EventState },

    #[error("event {0} has no transactions")]
    NoTransactions(EventId),

    #[error("no executor registered for transaction type '{0}'")]
    ExecutorNotRegistered(String),

    #[error("dependency cycle detected involving transaction {0}")]
    DependencyCycle(TransactionId),

    #[error("transaction {transaction} depends on unknown transaction {dependency}")]
    UnknownDependency {
        transaction: TransactionId,
        dependency: TransactionId,
    },

    #[error("dependency {dependency} of transaction {transaction} cannot complete: {reason}")]
    DependencyFailed {
        transaction: TransactionId,
        dependency: TransactionId,
        reason: String,
    },

    #[error("transaction {transaction} failed after {attempts} attempt(s): {message}")]
    TransactionFailed {
        transaction: TransactionId,
        attempts: u32,
        message: String,
    },

    #[error("event {0} was cancelled")]
    Cancelled(EventId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn invalid_state(expected: impl Into<String>, found: EventState) -> Self {
        Self::InvalidEventState {
            expected: expected.into(),
            found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_backend_faults_are_transient() {
        let transient = ExecutorError::Store(StoreError::Database("connection reset".into()));
        assert!(transient.is_transient());

        let wrapped = ExecutorError::Ledger(LedgerError::Store(StoreError::Database(
            "timeout".into(),
        )));
        assert!(wrapped.is_transient());

        for permanent in [
            ExecutorError::Payload("bad".into()),
            ExecutorError::Domain(DomainError::validation("bad")),
            ExecutorError::Store(StoreError::Conflict("dup".into())),
            ExecutorError::Partial {
                message: "half done".into(),
                result: json!({}),
            },
        ] {
            assert!(!permanent.is_transient(), "{permanent} must not be retried");
        }
    }

    #[test]
    fn partial_results_survive_the_error_path() {
        let err = ExecutorError::Partial {
            message: "1 of 2 failed".into(),
            result: json!({"status": "PARTIALLY_COMPLETED"}),
        };
        assert_eq!(
            err.partial_result().unwrap()["status"],
            "PARTIALLY_COMPLETED"
        );
        assert!(ExecutorError::Payload("bad".into()).partial_result().is_none());
    }
}
