//! Event coordinator: lifecycle management for chained transaction events,
//! dependency-ordered execution with retry, and reverse-order compensation.
//!
//! `start_event` returns after scheduling; each event executes on a detached
//! tokio task bound to a cancellation token held here. The caller's own
//! cancellation never reaches that task; `cancel_event` is the explicit way
//! to stop one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use cascade_core::{DomainError, EventId, TransactionId};

use crate::error::EngineError;
use crate::event::{Event, EventState, Transaction, TransactionState};
use crate::registry::ExecutorRegistry;
use crate::store::EventStore;

/// Retry tuning for transaction execution.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempts per transaction before it is marked failed.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Caller-side description of a transaction step.
#[derive(Debug, Clone)]
pub struct TransactionSpec {
    pub name: String,
    pub kind: String,
    pub order: i32,
    pub dependencies: Vec<TransactionId>,
    pub payload: JsonValue,
}

/// Orchestrates chained transaction events.
pub struct Coordinator {
    store: Arc<dyn EventStore>,
    registry: Arc<ExecutorRegistry>,
    config: EngineConfig,
    running: Arc<Mutex<HashMap<EventId, CancellationToken>>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn EventStore>, registry: Arc<ExecutorRegistry>) -> Self {
        Self::with_config(store, registry, EngineConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn EventStore>,
        registry: Arc<ExecutorRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> Arc<ExecutorRegistry> {
        self.registry.clone()
    }

    /// Create an event in `CREATED`.
    #[instrument(skip(self, description, metadata))]
    pub async fn create_event(
        &self,
        name: &str,
        description: Option<String>,
        timeout: Option<Duration>,
        metadata: JsonValue,
    ) -> Result<Event, EngineError> {
        if name.trim().is_empty() {
            return Err(DomainError::validation("event name must not be empty").into());
        }
        let event = Event::new(name, description, timeout, metadata);
        self.store.save_event(&event).await?;
        info!(event_id = %event.id, name, "event created");
        Ok(event)
    }

    pub async fn get_event(&self, id: EventId) -> Result<Event, EngineError> {
        self.store
            .get_event(id)
            .await?
            .ok_or(EngineError::EventNotFound(id))
    }

    pub async fn get_event_state(&self, id: EventId) -> Result<EventState, EngineError> {
        Ok(self.get_event(id).await?.state)
    }

    pub async fn list_event_transactions(
        &self,
        id: EventId,
    ) -> Result<Vec<Transaction>, EngineError> {
        self.get_event(id).await?;
        Ok(self.store.list_event_transactions(id).await?)
    }

    /// Append a transaction step. Permitted only before validation has
    /// finished; the first append moves the event to `VALIDATING`.
    #[instrument(skip(self, spec), fields(event_id = %event_id, kind = %spec.kind))]
    pub async fn add_transaction(
        &self,
        event_id: EventId,
        spec: TransactionSpec,
    ) -> Result<Transaction, EngineError> {
        let mut event = self.get_event(event_id).await?;
        if !matches!(event.state, EventState::Created | EventState::Validating) {
            return Err(EngineError::invalid_state(
                "CREATED or VALIDATING",
                event.state,
            ));
        }
        if spec.kind.trim().is_empty() {
            return Err(DomainError::validation("transaction type must not be empty").into());
        }

        let tx = Transaction::new(
            event_id,
            spec.name,
            spec.kind,
            spec.order,
            spec.dependencies,
            spec.payload,
        );
        self.store.save_transaction(&tx).await?;

        if event.state == EventState::Created {
            self.mark_event(&mut event, EventState::Validating).await?;
        }

        info!(transaction_id = %tx.id, order = tx.order, "transaction added");
        Ok(tx)
    }

    /// Check the transaction graph and move the event to `VALIDATED`.
    ///
    /// Dependencies must reference sibling transactions and form a DAG; a
    /// cycle or an unknown reference is fatal and fails the event.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn validate_event(&self, event_id: EventId) -> Result<Event, EngineError> {
        let mut event = self.get_event(event_id).await?;
        if event.state != EventState::Validating {
            return Err(EngineError::invalid_state("VALIDATING", event.state));
        }

        let transactions = self.store.list_event_transactions(event_id).await?;
        if transactions.is_empty() {
            return Err(EngineError::NoTransactions(event_id));
        }

        if let Err(e) = check_dependency_graph(&transactions) {
            event.error = Some(e.to_string());
            self.mark_event(&mut event, EventState::Failed).await?;
            return Err(e);
        }

        self.mark_event(&mut event, EventState::Validated).await?;
        Ok(event)
    }

    /// Transition to `EXECUTING` and schedule background execution.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn start_event(&self, event_id: EventId) -> Result<(), EngineError> {
        let mut event = self.get_event(event_id).await?;
        if event.state != EventState::Validated {
            return Err(EngineError::invalid_state("VALIDATED", event.state));
        }
        self.mark_event(&mut event, EventState::Executing).await?;

        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event_id, token.clone());

        let store = self.store.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            run_event(store, registry, config, event_id, token).await;
            running
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&event_id);
        });

        Ok(())
    }

    /// Cancel a running event. The background task observes the token,
    /// marks the event `FAILED`, and compensates.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn cancel_event(&self, event_id: EventId) -> Result<(), EngineError> {
        let event = self.get_event(event_id).await?;
        if event.state != EventState::Executing {
            return Err(EngineError::invalid_state("EXECUTING", event.state));
        }

        let token = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_id)
            .cloned();

        match token {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            // No live task (e.g. process restart mid-execution): settle the
            // state directly so reconciliation can proceed.
            None => {
                fail_and_compensate(
                    &self.store,
                    &self.registry,
                    event_id,
                    &EngineError::Cancelled(event_id),
                )
                .await
            }
        }
    }

    /// Force reverse-order compensation of completed transactions.
    /// Permitted from `COMPLETED` or `FAILED`.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn compensate_event(&self, event_id: EventId) -> Result<(), EngineError> {
        let event = self.get_event(event_id).await?;
        if !matches!(event.state, EventState::Completed | EventState::Failed) {
            return Err(EngineError::invalid_state("COMPLETED or FAILED", event.state));
        }
        compensate(&self.store, &self.registry, event_id).await
    }

    /// Delete an event and everything it owns. Only permitted before start.
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn delete_event(&self, event_id: EventId) -> Result<(), EngineError> {
        let event = self.get_event(event_id).await?;
        if !matches!(
            event.state,
            EventState::Created | EventState::Validating | EventState::Validated
        ) {
            return Err(EngineError::invalid_state(
                "CREATED, VALIDATING or VALIDATED",
                event.state,
            ));
        }
        self.store.delete_event(event_id).await?;
        info!(event_id = %event_id, "event deleted");
        Ok(())
    }

    async fn mark_event(&self, event: &mut Event, to: EventState) -> Result<(), EngineError> {
        mark_event(&self.store, event, to).await
    }
}

/// Persist an event state transition, enforcing the state machine.
async fn mark_event(
    store: &Arc<dyn EventStore>,
    event: &mut Event,
    to: EventState,
) -> Result<(), EngineError> {
    if !event.state.can_transition_to(to) {
        return Err(EngineError::invalid_state(
            format!("a state that can reach {to}"),
            event.state,
        ));
    }
    event.state = to;
    event.updated_at = Utc::now();
    if to.is_terminal() {
        event.completed_at = Some(event.updated_at);
    }
    store.update_event(event).await?;
    info!(event_id = %event.id, state = %to, "event transitioned");
    Ok(())
}

/// Reject unknown dependency references and cycles (Kahn's algorithm).
fn check_dependency_graph(transactions: &[Transaction]) -> Result<(), EngineError> {
    let ids: HashMap<TransactionId, usize> = transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| (tx.id, i))
        .collect();

    let mut in_degree = vec![0usize; transactions.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); transactions.len()];

    for (i, tx) in transactions.iter().enumerate() {
        for dep in &tx.dependencies {
            let Some(&j) = ids.get(dep) else {
                return Err(EngineError::UnknownDependency {
                    transaction: tx.id,
                    dependency: *dep,
                });
            };
            in_degree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut queue: Vec<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut visited = 0usize;

    while let Some(i) = queue.pop() {
        visited += 1;
        for &dep in &dependents[i] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                queue.push(dep);
            }
        }
    }

    if visited < transactions.len() {
        let stuck = transactions
            .iter()
            .enumerate()
            .find(|(i, _)| in_degree[*i] > 0)
            .map(|(_, tx)| tx.id)
            .unwrap_or(transactions[0].id);
        return Err(EngineError::DependencyCycle(stuck));
    }
    Ok(())
}

/// Background task body: walk the transaction graph, then settle the event.
async fn run_event(
    store: Arc<dyn EventStore>,
    registry: Arc<ExecutorRegistry>,
    config: EngineConfig,
    event_id: EventId,
    cancel: CancellationToken,
) {
    match execute_event(&store, &registry, &config, event_id, &cancel).await {
        Ok(()) => {}
        Err(e) => {
            warn!(event_id = %event_id, error = %e, "event execution failed, compensating");
            if let Err(settle_err) = fail_and_compensate(&store, &registry, event_id, &e).await {
                error!(
                    event_id = %event_id,
                    error = %settle_err,
                    "failed to settle event after execution failure"
                );
            }
        }
    }
}

enum DependencyStatus {
    Ready,
    Waiting,
}

async fn dependency_status(
    store: &Arc<dyn EventStore>,
    tx: &Transaction,
) -> Result<DependencyStatus, EngineError> {
    for dep_id in &tx.dependencies {
        let dep = store
            .get_transaction(*dep_id)
            .await?
            .ok_or(EngineError::UnknownDependency {
                transaction: tx.id,
                dependency: *dep_id,
            })?;
        match dep.state {
            TransactionState::Completed | TransactionState::Skipped => {}
            TransactionState::Pending | TransactionState::Executing => {
                return Ok(DependencyStatus::Waiting)
            }
            TransactionState::Failed
            | TransactionState::Compensating
            | TransactionState::Compensated => {
                return Err(EngineError::DependencyFailed {
                    transaction: tx.id,
                    dependency: dep.id,
                    reason: format!("dependency is {}", dep.state),
                })
            }
        }
    }
    Ok(DependencyStatus::Ready)
}

async fn execute_event(
    store: &Arc<dyn EventStore>,
    registry: &Arc<ExecutorRegistry>,
    config: &EngineConfig,
    event_id: EventId,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let mut passes = 0usize;
    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled(event_id));
        }

        let transactions = store.list_event_transactions(event_id).await?;
        if transactions.is_empty() {
            return Err(EngineError::NoTransactions(event_id));
        }
        // Enough passes to drain any DAG; exceeding this means a cycle
        // slipped past validation.
        let max_passes = transactions.len() + 1;

        let mut progressed = false;
        let mut waiting = false;
        for tx in &transactions {
            if tx.state != TransactionState::Pending {
                continue;
            }
            match dependency_status(store, tx).await? {
                DependencyStatus::Ready => {
                    execute_with_retry(store, registry, config, cancel, tx.clone()).await?;
                    progressed = true;
                }
                DependencyStatus::Waiting => waiting = true,
            }
        }

        let transactions = store.list_event_transactions(event_id).await?;
        let any_pending = transactions
            .iter()
            .any(|t| t.state == TransactionState::Pending);

        if !any_pending {
            let mut event = store
                .get_event(event_id)
                .await?
                .ok_or(EngineError::EventNotFound(event_id))?;
            mark_event(store, &mut event, EventState::Completed).await?;
            info!(event_id = %event_id, "event completed");
            return Ok(());
        }

        passes += 1;
        if (!progressed && waiting) || passes > max_passes {
            let stuck = transactions
                .iter()
                .find(|t| t.state == TransactionState::Pending)
                .map(|t| t.id)
                .unwrap_or(transactions[0].id);
            return Err(EngineError::DependencyCycle(stuck));
        }
    }
}

async fn execute_with_retry(
    store: &Arc<dyn EventStore>,
    registry: &Arc<ExecutorRegistry>,
    config: &EngineConfig,
    cancel: &CancellationToken,
    mut tx: Transaction,
) -> Result<(), EngineError> {
    let executor = registry
        .get(&tx.kind)
        .ok_or_else(|| EngineError::ExecutorNotRegistered(tx.kind.clone()))?;

    let mut attempt = 0u32;
    loop {
        attempt += 1;

        tx.state = TransactionState::Executing;
        if tx.started_at.is_none() {
            tx.started_at = Some(Utc::now());
        }
        tx.touch();
        store.update_transaction(&tx).await?;
        info!(transaction_id = %tx.id, kind = %tx.kind, attempt, "executing transaction");

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled(tx.event_id)),
            r = executor.execute(&tx) => r,
        };

        match outcome {
            Ok(result) => {
                tx.state = TransactionState::Completed;
                tx.result = Some(result);
                tx.error = None;
                tx.completed_at = Some(Utc::now());
                tx.touch();
                store.update_transaction(&tx).await?;
                info!(transaction_id = %tx.id, "transaction completed");
                return Ok(());
            }
            Err(err) => {
                if err.is_transient() && attempt < config.max_retries {
                    warn!(
                        transaction_id = %tx.id,
                        attempt,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled(tx.event_id)),
                        _ = tokio::time::sleep(config.retry_delay) => {}
                    }
                    continue;
                }

                tx.state = TransactionState::Failed;
                tx.error = Some(err.to_string());
                if let Some(partial) = err.partial_result() {
                    tx.result = Some(partial);
                }
                tx.touch();
                store.update_transaction(&tx).await?;
                return Err(EngineError::TransactionFailed {
                    transaction: tx.id,
                    attempts: attempt,
                    message: err.to_string(),
                });
            }
        }
    }
}

/// Record the failure cause, mark the event `FAILED`, and compensate.
async fn fail_and_compensate(
    store: &Arc<dyn EventStore>,
    registry: &Arc<ExecutorRegistry>,
    event_id: EventId,
    cause: &EngineError,
) -> Result<(), EngineError> {
    let mut event = store
        .get_event(event_id)
        .await?
        .ok_or(EngineError::EventNotFound(event_id))?;
    if event.state.is_terminal() {
        return Ok(());
    }
    event.error = Some(cause.to_string());
    if event.state != EventState::Failed {
        mark_event(store, &mut event, EventState::Failed).await?;
    } else {
        store.update_event(&event).await?;
    }
    compensate(store, registry, event_id).await
}

/// Reverse-order compensation sweep.
///
/// Compensates transactions that completed, plus failed ones that recorded a
/// partial result (a batch that applied some children). Individual
/// compensator failures do not abort the sweep: they are logged for manual
/// reconciliation and the event still reaches `ROLLED_BACK`.
async fn compensate(
    store: &Arc<dyn EventStore>,
    registry: &Arc<ExecutorRegistry>,
    event_id: EventId,
) -> Result<(), EngineError> {
    let mut event = store
        .get_event(event_id)
        .await?
        .ok_or(EngineError::EventNotFound(event_id))?;
    mark_event(store, &mut event, EventState::RollingBack).await?;

    let mut transactions = store.list_event_transactions(event_id).await?;
    transactions.reverse();

    let mut failures = 0usize;
    for mut tx in transactions {
        let eligible = tx.state == TransactionState::Completed
            || (tx.state == TransactionState::Failed && tx.result.is_some());
        if !eligible {
            continue;
        }

        let Some(executor) = registry.get(&tx.kind) else {
            warn!(
                transaction_id = %tx.id,
                kind = %tx.kind,
                "no executor registered, cannot compensate"
            );
            failures += 1;
            continue;
        };

        tx.state = TransactionState::Compensating;
        tx.touch();
        if let Err(e) = store.update_transaction(&tx).await {
            warn!(transaction_id = %tx.id, error = %e, "failed to persist compensating state");
        }

        match executor.compensate(&tx).await {
            Ok(result) => {
                tx.state = TransactionState::Compensated;
                if let Some(r) = result {
                    tx.result = Some(r);
                }
                tx.touch();
                if let Err(e) = store.update_transaction(&tx).await {
                    warn!(transaction_id = %tx.id, error = %e, "failed to persist compensated state");
                }
                info!(transaction_id = %tx.id, "transaction compensated");
            }
            Err(e) => {
                failures += 1;
                tx.error = Some(format!("compensation failed: {e}"));
                if let Some(partial) = e.partial_result() {
                    tx.result = Some(partial);
                }
                tx.touch();
                if let Err(persist) = store.update_transaction(&tx).await {
                    warn!(transaction_id = %tx.id, error = %persist, "failed to persist compensation error");
                }
                warn!(
                    transaction_id = %tx.id,
                    error = %e,
                    "compensation failed, manual reconciliation required"
                );
            }
        }
    }

    if failures > 0 {
        warn!(event_id = %event_id, failures, "compensation sweep finished with failures");
    }
    mark_event(store, &mut event, EventState::RolledBack).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEventStore;
    use serde_json::json;

    fn coordinator() -> Coordinator {
        Coordinator::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(ExecutorRegistry::new()),
        )
    }

    fn spec(kind: &str, order: i32, deps: Vec<TransactionId>) -> TransactionSpec {
        TransactionSpec {
            name: format!("{kind}-{order}"),
            kind: kind.to_string(),
            order,
            dependencies: deps,
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn first_add_moves_event_to_validating() {
        let c = coordinator();
        let event = c.create_event("e", None, None, json!({})).await.unwrap();
        assert_eq!(event.state, EventState::Created);

        c.add_transaction(event.id, spec("noop", 1, vec![])).await.unwrap();
        assert_eq!(
            c.get_event_state(event.id).await.unwrap(),
            EventState::Validating
        );
    }

    #[tokio::test]
    async fn add_after_validation_is_rejected() {
        let c = coordinator();
        let event = c.create_event("e", None, None, json!({})).await.unwrap();
        c.add_transaction(event.id, spec("noop", 1, vec![])).await.unwrap();
        c.validate_event(event.id).await.unwrap();

        let err = c
            .add_transaction(event.id, spec("noop", 2, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidEventState { .. }));
    }

    #[tokio::test]
    async fn start_requires_validated() {
        let c = coordinator();
        let event = c.create_event("e", None, None, json!({})).await.unwrap();
        c.add_transaction(event.id, spec("noop", 1, vec![])).await.unwrap();

        let err = c.start_event(event.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidEventState { .. }));
    }

    #[tokio::test]
    async fn validation_fails_events_with_cycles() {
        let c = coordinator();
        let event = c.create_event("e", None, None, json!({})).await.unwrap();
        let t1 = c
            .add_transaction(event.id, spec("noop", 1, vec![]))
            .await
            .unwrap();
        let t2 = c
            .add_transaction(event.id, spec("noop", 2, vec![t1.id]))
            .await
            .unwrap();

        // Rebuild t1 -> t2 to close the loop; stores allow it, validation
        // must not.
        let store = c.store.clone();
        let mut t1 = store.get_transaction(t1.id).await.unwrap().unwrap();
        t1.dependencies = vec![t2.id];
        store.update_transaction(&t1).await.unwrap();

        let err = c.validate_event(event.id).await.unwrap_err();
        assert!(matches!(err, EngineError::DependencyCycle(_)));
        assert_eq!(c.get_event_state(event.id).await.unwrap(), EventState::Failed);
    }

    #[tokio::test]
    async fn validation_fails_on_unknown_dependency() {
        let c = coordinator();
        let event = c.create_event("e", None, None, json!({})).await.unwrap();
        c.add_transaction(event.id, spec("noop", 1, vec![TransactionId::new()]))
            .await
            .unwrap();

        let err = c.validate_event(event.id).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownDependency { .. }));
    }

    #[tokio::test]
    async fn empty_event_cannot_validate() {
        let c = coordinator();
        let event = c.create_event("e", None, None, json!({})).await.unwrap();
        let err = c.validate_event(event.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidEventState { .. }));
    }

    #[tokio::test]
    async fn delete_is_pre_start_only() {
        let c = coordinator();
        let event = c.create_event("e", None, None, json!({})).await.unwrap();
        c.add_transaction(event.id, spec("noop", 1, vec![])).await.unwrap();
        c.validate_event(event.id).await.unwrap();
        c.delete_event(event.id).await.unwrap();
        assert!(matches!(
            c.get_event(event.id).await.unwrap_err(),
            EngineError::EventNotFound(_)
        ));
    }

    #[test]
    fn graph_check_accepts_dags() {
        let event_id = EventId::new();
        let a = Transaction::new(event_id, "a", "noop", 1, vec![], json!({}));
        let b = Transaction::new(event_id, "b", "noop", 2, vec![a.id], json!({}));
        let c = Transaction::new(event_id, "c", "noop", 3, vec![a.id, b.id], json!({}));
        check_dependency_graph(&[a, b, c]).unwrap();
    }
}
