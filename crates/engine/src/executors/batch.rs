//! `batch.operation`: dispatch a set of child transactions through the
//! registry under a bounded worker pool.
//!
//! Child transaction ids are derived from the parent transaction id and the
//! child's position, so a retried batch re-dispatches onto the same ids and
//! the per-child ledger effects stay idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use cascade_core::TransactionId;

use crate::error::ExecutorError;
use crate::event::Transaction;
use crate::executors::{parse_payload, to_json};
use crate::registry::{ExecutorRegistry, TransactionExecutor};

/// Worker cap while executing children.
const MAX_EXECUTE_CONCURRENCY: usize = 10;
/// Lower cap while compensating.
const MAX_COMPENSATE_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct BatchOperationPayload {
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub transactions: Vec<BatchChild>,
}

/// One child operation inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchChild {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOperationResult {
    pub batch_id: String,
    pub status: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub processed_at: DateTime<Utc>,
    pub results: Vec<BatchChildOutcome>,
}

/// Per-child outcome. Carries enough (type, payload, derived transaction id,
/// result) for the compensation pass to re-dispatch the child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchChildOutcome {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<JsonValue>,
    pub payload: JsonValue,
    pub transaction_id: TransactionId,
    pub timestamp: DateTime<Utc>,
}

pub struct BatchOperationExecutor {
    registry: Arc<ExecutorRegistry>,
}

impl BatchOperationExecutor {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TransactionExecutor for BatchOperationExecutor {
    async fn execute(&self, tx: &Transaction) -> Result<JsonValue, ExecutorError> {
        let payload: BatchOperationPayload = parse_payload(tx)?;
        if payload.transactions.is_empty() {
            return Err(ExecutorError::Payload(
                "batch requires at least one transaction".to_string(),
            ));
        }

        let batch_id = payload
            .batch_id
            .clone()
            .unwrap_or_else(|| tx.id.to_string());
        let total = payload.transactions.len();

        let sem = Arc::new(Semaphore::new(MAX_EXECUTE_CONCURRENCY));
        let mut set: JoinSet<(usize, BatchChildOutcome)> = JoinSet::new();

        for (idx, child) in payload.transactions.into_iter().enumerate() {
            let registry = self.registry.clone();
            let sem = sem.clone();
            let event_id = tx.event_id;
            let parent = *tx.id.as_uuid();

            set.spawn(async move {
                let child_id = child.id.clone().unwrap_or_else(|| idx.to_string());
                let child_tx = Transaction::new(
                    event_id,
                    format!("batch item {child_id}"),
                    child.kind.clone(),
                    idx as i32,
                    vec![],
                    child.payload.clone(),
                )
                .with_id(TransactionId::derived(&parent, &format!("child-{idx}")));

                let mut outcome = BatchChildOutcome {
                    id: child_id,
                    kind: child.kind.clone(),
                    status: "FAILED".to_string(),
                    error: None,
                    result: None,
                    payload: child.payload,
                    transaction_id: child_tx.id,
                    timestamp: Utc::now(),
                };

                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        outcome.error = Some("worker pool closed".to_string());
                        return (idx, outcome);
                    }
                };

                let Some(executor) = registry.get(&child.kind) else {
                    outcome.error = Some(format!(
                        "no executor registered for transaction type '{}'",
                        child.kind
                    ));
                    return (idx, outcome);
                };

                match executor.execute(&child_tx).await {
                    Ok(result) => {
                        outcome.status = "COMPLETED".to_string();
                        outcome.result = Some(result);
                    }
                    Err(e) => {
                        outcome.error = Some(e.to_string());
                        outcome.result = e.partial_result();
                    }
                }
                outcome.timestamp = Utc::now();
                (idx, outcome)
            });
        }

        let mut indexed: Vec<(usize, BatchChildOutcome)> = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => warn!(error = %e, "batch child task aborted"),
            }
        }
        indexed.sort_by_key(|(idx, _)| *idx);
        let results: Vec<BatchChildOutcome> = indexed.into_iter().map(|(_, o)| o).collect();

        let succeeded = results.iter().filter(|r| r.status == "COMPLETED").count();
        let failed = total - succeeded;
        let status = if failed == 0 {
            "COMPLETED"
        } else if succeeded > 0 {
            "PARTIALLY_COMPLETED"
        } else {
            "FAILED"
        };

        let result = BatchOperationResult {
            batch_id,
            status: status.to_string(),
            total,
            succeeded,
            failed,
            processed_at: Utc::now(),
            results,
        };

        if failed == 0 {
            to_json(&result)
        } else {
            // Surface the partial outcome so the coordinator records it on
            // the failed transaction; compensation reads it back.
            Err(ExecutorError::Partial {
                message: format!("{failed} of {total} batch transactions failed"),
                result: to_json(&result)?,
            })
        }
    }

    async fn compensate(&self, tx: &Transaction) -> Result<Option<JsonValue>, ExecutorError> {
        let Some(value) = &tx.result else {
            return Ok(None);
        };
        let mut result: BatchOperationResult = serde_json::from_value(value.clone())
            .map_err(|e| ExecutorError::Payload(e.to_string()))?;

        let sem = Arc::new(Semaphore::new(MAX_COMPENSATE_CONCURRENCY));
        let mut set: JoinSet<(usize, BatchChildOutcome)> = JoinSet::new();

        for (idx, outcome) in result.results.iter().enumerate() {
            if outcome.status != "COMPLETED" {
                continue;
            }
            let registry = self.registry.clone();
            let sem = sem.clone();
            let event_id = tx.event_id;
            let mut outcome = outcome.clone();

            set.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        outcome.error = Some("worker pool closed".to_string());
                        return (idx, outcome);
                    }
                };

                let Some(executor) = registry.get(&outcome.kind) else {
                    outcome.error = Some(format!(
                        "no executor registered for transaction type '{}'",
                        outcome.kind
                    ));
                    return (idx, outcome);
                };

                let mut child_tx = Transaction::new(
                    event_id,
                    format!("batch item {}", outcome.id),
                    outcome.kind.clone(),
                    idx as i32,
                    vec![],
                    outcome.payload.clone(),
                )
                .with_id(outcome.transaction_id);
                child_tx.result = outcome.result.clone();

                match executor.compensate(&child_tx).await {
                    Ok(updated) => {
                        outcome.status = "COMPENSATED".to_string();
                        if let Some(r) = updated {
                            outcome.result = Some(r);
                        }
                    }
                    Err(e) => {
                        warn!(
                            child_id = %outcome.id,
                            error = %e,
                            "batch child compensation failed"
                        );
                        outcome.error = Some(format!("compensation failed: {e}"));
                    }
                }
                outcome.timestamp = Utc::now();
                (idx, outcome)
            });
        }

        let mut failures = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, outcome)) => {
                    if outcome.status != "COMPENSATED" {
                        failures += 1;
                    }
                    result.results[idx] = outcome;
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, "batch compensation task aborted");
                }
            }
        }

        result.status = if failures == 0 {
            "COMPENSATED".to_string()
        } else {
            "PARTIALLY_COMPENSATED".to_string()
        };
        result.processed_at = Utc::now();
        Ok(Some(to_json(&result)?))
    }
}
