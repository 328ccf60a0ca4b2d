//! End-to-end engine flows over in-memory stores: complete events, failing
//! events with compensation, dependency ordering, cancellation, and the
//! withdrawal race.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value as JsonValue};

use cascade_core::{AccountId, EventId};
use cascade_engine::{
    register_builtin_executors, BalanceSource, Coordinator, EngineConfig, EventState,
    ExecutorError, ExecutorRegistry, InMemoryEventStore, InMemoryLienStore, LienManager, Sweeper,
    SystemAccounts, Transaction, TransactionExecutor, TransactionSpec, TransactionState,
};
use cascade_ledger::memory::{InMemoryAccountStore, InMemoryEntryStore};
use cascade_ledger::{Account, AccountKind, DepositArgs, LedgerService, StoreError};

struct Harness {
    ledger: Arc<LedgerService>,
    liens: Arc<LienManager>,
    coordinator: Arc<Coordinator>,
    events: Arc<InMemoryEventStore>,
    registry: Arc<ExecutorRegistry>,
    deposit_clearing: AccountId,
}

impl Harness {
    async fn new() -> Self {
        let ledger = Arc::new(LedgerService::new(
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryEntryStore::new()),
        ));
        let liens = Arc::new(LienManager::new(
            Arc::new(InMemoryLienStore::new()),
            ledger.clone() as Arc<dyn BalanceSource>,
        ));

        let mut system_ids = Vec::new();
        for name in [
            "deposit-clearing",
            "withdrawal-clearing",
            "fee-revenue",
            "fx-usd",
            "fx-eur",
        ] {
            let account = ledger
                .create_account(Account::new(
                    AccountId::new(),
                    name,
                    AccountKind::System,
                    None,
                    "USD",
                ))
                .await
                .unwrap();
            system_ids.push(account.id);
        }
        let system = Arc::new(
            SystemAccounts::new(system_ids[0], system_ids[1], system_ids[2])
                .with_fx_holding("USD", system_ids[3])
                .with_fx_holding("EUR", system_ids[4]),
        );

        let registry = Arc::new(ExecutorRegistry::new());
        register_builtin_executors(&registry, ledger.clone(), liens.clone(), system.clone());

        let events = Arc::new(InMemoryEventStore::new());
        let coordinator = Arc::new(Coordinator::with_config(
            events.clone(),
            registry.clone(),
            EngineConfig {
                max_retries: 3,
                retry_delay: Duration::from_millis(10),
            },
        ));

        Self {
            ledger,
            liens,
            coordinator,
            events,
            registry,
            deposit_clearing: system_ids[0],
        }
    }

    async fn wallet(&self, name: &str, currency: &str) -> AccountId {
        self.ledger
            .create_account(Account::new(
                AccountId::new(),
                name,
                AccountKind::Asset,
                None,
                currency,
            ))
            .await
            .unwrap()
            .id
    }

    async fn seed(&self, account: AccountId, amount: Decimal) {
        self.ledger
            .deposit(DepositArgs {
                entry_id: cascade_core::EntryId::new(),
                clearing: self.deposit_clearing,
                account,
                amount,
                currency: "USD".to_string(),
                reference: Some("seed".to_string()),
                event_id: None,
            })
            .await
            .unwrap();
    }

    async fn balance(&self, account: AccountId) -> Decimal {
        self.ledger.available_balance(account).await.unwrap()
    }

    fn spec(kind: &str, order: i32, payload: JsonValue) -> TransactionSpec {
        TransactionSpec {
            name: format!("{kind}-{order}"),
            kind: kind.to_string(),
            order,
            dependencies: vec![],
            payload,
        }
    }

    /// Create, populate, validate, and start an event, then wait for a
    /// terminal state.
    async fn run_event(&self, specs: Vec<TransactionSpec>) -> (EventId, EventState) {
        let event = self
            .coordinator
            .create_event("test-event", None, None, json!({}))
            .await
            .unwrap();
        for spec in specs {
            self.coordinator
                .add_transaction(event.id, spec)
                .await
                .unwrap();
        }
        self.coordinator.validate_event(event.id).await.unwrap();
        self.coordinator.start_event(event.id).await.unwrap();
        let state = self.wait_terminal(event.id).await;
        (event.id, state)
    }

    async fn wait_terminal(&self, event_id: EventId) -> EventState {
        for _ in 0..500 {
            let state = self.coordinator.get_event_state(event_id).await.unwrap();
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("event did not reach a terminal state within timeout");
    }
}

#[tokio::test]
async fn balanced_transfer_completes() {
    let h = Harness::new().await;
    let a = h.wallet("a", "USD").await;
    let b = h.wallet("b", "USD").await;
    h.seed(a, dec!(100)).await;

    let (event_id, state) = h
        .run_event(vec![Harness::spec(
            "wallet.transfer",
            1,
            json!({
                "source_account_id": a,
                "destination_account_id": b,
                "amount": "40",
                "currency": "USD",
            }),
        )])
        .await;

    assert_eq!(state, EventState::Completed);
    assert_eq!(h.balance(a).await, dec!(60));
    assert_eq!(h.balance(b).await, dec!(40));

    // Exactly one entry with two lines came out of the event.
    let txs = h
        .coordinator
        .list_event_transactions(event_id)
        .await
        .unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].state, TransactionState::Completed);
    let result = txs[0].result.as_ref().unwrap();
    let entry_id: cascade_core::EntryId =
        serde_json::from_value(result["entry_id"].clone()).unwrap();
    let entry = h.ledger.get_entry(entry_id).await.unwrap().unwrap();
    assert_eq!(entry.lines.len(), 2);
    assert_eq!(entry.event_id, Some(event_id));
}

#[tokio::test]
async fn concurrent_withdrawals_cannot_both_win() {
    let h = Harness::new().await;
    let x = h.wallet("x", "USD").await;
    h.seed(x, dec!(100)).await;

    let mut ids = Vec::new();
    for i in 0..2 {
        let event = h
            .coordinator
            .create_event(&format!("withdraw-{i}"), None, None, json!({}))
            .await
            .unwrap();
        h.coordinator
            .add_transaction(
                event.id,
                Harness::spec(
                    "wallet.withdrawal",
                    1,
                    json!({
                        "account_id": x,
                        "amount": "80",
                        "currency": "USD",
                    }),
                ),
            )
            .await
            .unwrap();
        h.coordinator.validate_event(event.id).await.unwrap();
        ids.push(event.id);
    }

    // Start both without awaiting terminal states in between.
    h.coordinator.start_event(ids[0]).await.unwrap();
    h.coordinator.start_event(ids[1]).await.unwrap();

    let first = h.wait_terminal(ids[0]).await;
    let second = h.wait_terminal(ids[1]).await;

    let completed = [first, second]
        .iter()
        .filter(|s| **s == EventState::Completed)
        .count();
    assert_eq!(completed, 1, "exactly one withdrawal may win");
    assert_eq!(h.balance(x).await, dec!(20));

    // The loser surfaced insufficient funds and was rolled back.
    let loser = if first == EventState::Completed {
        ids[1]
    } else {
        ids[0]
    };
    let event = h.coordinator.get_event(loser).await.unwrap();
    assert_eq!(event.state, EventState::RolledBack);
    assert!(event.error.as_deref().unwrap().contains("insufficient funds"));

    // No reserving liens are left behind by either event.
    let liens = h.liens.list_liens_by_account(x).await.unwrap();
    assert!(liens.iter().all(|l| !l.state.is_reserving()));
}

#[tokio::test]
async fn batch_with_failing_child_rolls_back_completely() {
    let h = Harness::new().await;
    let a = h.wallet("a", "USD").await;
    let b = h.wallet("b", "USD").await;
    h.seed(a, dec!(100)).await;

    let (event_id, state) = h
        .run_event(vec![Harness::spec(
            "batch.operation",
            1,
            json!({
                "transactions": [
                    {
                        "id": "child-transfer",
                        "type": "wallet.transfer",
                        "payload": {
                            "source_account_id": a,
                            "destination_account_id": b,
                            "amount": "10",
                            "currency": "USD",
                        },
                    },
                    {
                        "id": "child-withdrawal",
                        "type": "wallet.withdrawal",
                        "payload": {
                            "account_id": a,
                            "amount": "1000000",
                            "currency": "USD",
                        },
                    },
                ],
            }),
        )])
        .await;

    assert_eq!(state, EventState::RolledBack);

    // The batch recorded its partial outcome and was compensated.
    let txs = h
        .coordinator
        .list_event_transactions(event_id)
        .await
        .unwrap();
    assert_eq!(txs[0].state, TransactionState::Compensated);
    let result = txs[0].result.as_ref().unwrap();
    assert_eq!(result["status"], "COMPENSATED");
    let children = result["results"].as_array().unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0]["status"], "COMPENSATED");
    assert_eq!(children[1]["status"], "FAILED");

    // Final balances are identical to the initial ones.
    assert_eq!(h.balance(a).await, dec!(100));
    assert_eq!(h.balance(b).await, dec!(0));
}

#[tokio::test]
async fn exchange_with_fee_completes_and_compensates_exactly() {
    let h = Harness::new().await;
    let a = h.wallet("a", "USD").await;
    let b = h.wallet("b", "EUR").await;
    h.seed(a, dec!(200)).await;

    let (event_id, state) = h
        .run_event(vec![Harness::spec(
            "wallet.exchange",
            1,
            json!({
                "source_account_id": a,
                "source_currency": "USD",
                "source_amount": "100",
                "destination_account_id": b,
                "destination_currency": "EUR",
                "exchange_rate": "0.85",
                "fee_account_id": h.deposit_clearing.to_string(),
                "fee_amount": "2.50",
                "fee_currency": "USD",
            }),
        )])
        .await;

    assert_eq!(state, EventState::Completed);
    assert_eq!(h.balance(b).await, dec!(85));
    assert_eq!(h.balance(a).await, dec!(97.50));

    // Both entry ids are recorded for precise reversal.
    let txs = h
        .coordinator
        .list_event_transactions(event_id)
        .await
        .unwrap();
    let result = txs[0].result.as_ref().unwrap();
    assert!(result["exchange_entry_id"].is_string());
    assert!(result["fee_entry_id"].is_string());

    h.coordinator.compensate_event(event_id).await.unwrap();
    assert_eq!(
        h.coordinator.get_event_state(event_id).await.unwrap(),
        EventState::RolledBack
    );
    assert_eq!(h.balance(a).await, dec!(200));
    assert_eq!(h.balance(b).await, dec!(0));
}

#[tokio::test]
async fn dependent_transaction_waits_for_predecessor() {
    let h = Harness::new().await;
    let a = h.wallet("a", "USD").await;
    let b = h.wallet("b", "USD").await;

    let event = h
        .coordinator
        .create_event("chained", None, None, json!({}))
        .await
        .unwrap();
    let t1 = h
        .coordinator
        .add_transaction(
            event.id,
            Harness::spec(
                "wallet.deposit",
                1,
                json!({
                    "account_id": a,
                    "amount": "50",
                    "currency": "USD",
                }),
            ),
        )
        .await
        .unwrap();
    let mut t2_spec = Harness::spec(
        "wallet.transfer",
        2,
        json!({
            "source_account_id": a,
            "destination_account_id": b,
            "amount": "50",
            "currency": "USD",
        }),
    );
    t2_spec.dependencies = vec![t1.id];
    let t2 = h.coordinator.add_transaction(event.id, t2_spec).await.unwrap();

    h.coordinator.validate_event(event.id).await.unwrap();
    h.coordinator.start_event(event.id).await.unwrap();
    assert_eq!(h.wait_terminal(event.id).await, EventState::Completed);

    assert_eq!(h.balance(b).await, dec!(50));
    assert_eq!(h.balance(a).await, dec!(0));

    // The successor never began before its predecessor was persisted
    // complete.
    let txs = h
        .coordinator
        .list_event_transactions(event.id)
        .await
        .unwrap();
    let t1 = txs.iter().find(|t| t.id == t1.id).unwrap();
    let t2 = txs.iter().find(|t| t.id == t2.id).unwrap();
    assert!(t2.started_at.unwrap() >= t1.completed_at.unwrap());
}

#[tokio::test]
async fn re_executing_a_completed_step_changes_nothing() {
    let h = Harness::new().await;
    let a = h.wallet("a", "USD").await;
    let b = h.wallet("b", "USD").await;
    h.seed(a, dec!(100)).await;

    let tx = Transaction::new(
        EventId::new(),
        "t",
        "wallet.transfer",
        1,
        vec![],
        json!({
            "source_account_id": a,
            "destination_account_id": b,
            "amount": "25",
            "currency": "USD",
        }),
    );
    let executor = h.registry.get("wallet.transfer").unwrap();

    let first = executor.execute(&tx).await.unwrap();
    let second = executor.execute(&tx).await.unwrap();
    assert_eq!(first["entry_id"], second["entry_id"]);
    assert_eq!(h.balance(a).await, dec!(75));
    assert_eq!(h.balance(b).await, dec!(25));
}

#[tokio::test]
async fn unregistered_transaction_type_fails_the_event() {
    let h = Harness::new().await;
    let (event_id, state) = h
        .run_event(vec![Harness::spec("wallet.unknown", 1, json!({}))])
        .await;

    assert_eq!(state, EventState::RolledBack);
    let event = h.coordinator.get_event(event_id).await.unwrap();
    assert!(event
        .error
        .as_deref()
        .unwrap()
        .contains("no executor registered"));
}

/// Fails with a transient store error until the given attempt succeeds.
struct Flaky {
    attempts: AtomicU32,
    succeed_on: u32,
}

#[async_trait]
impl TransactionExecutor for Flaky {
    async fn execute(&self, _tx: &Transaction) -> Result<JsonValue, ExecutorError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < self.succeed_on {
            return Err(ExecutorError::Store(StoreError::Database(
                "connection reset".to_string(),
            )));
        }
        Ok(json!({ "attempt": attempt }))
    }

    async fn compensate(&self, _tx: &Transaction) -> Result<Option<JsonValue>, ExecutorError> {
        Ok(None)
    }
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let h = Harness::new().await;
    h.registry.register(
        "test.flaky",
        Arc::new(Flaky {
            attempts: AtomicU32::new(0),
            succeed_on: 3,
        }),
    );

    let (event_id, state) = h
        .run_event(vec![Harness::spec("test.flaky", 1, json!({}))])
        .await;

    assert_eq!(state, EventState::Completed);
    let txs = h
        .coordinator
        .list_event_transactions(event_id)
        .await
        .unwrap();
    assert_eq!(txs[0].result.as_ref().unwrap()["attempt"], 3);
}

#[tokio::test]
async fn retries_are_exhausted_for_persistent_transient_failures() {
    let h = Harness::new().await;
    h.registry.register(
        "test.flaky",
        Arc::new(Flaky {
            attempts: AtomicU32::new(0),
            succeed_on: 10,
        }),
    );

    let (event_id, state) = h
        .run_event(vec![Harness::spec("test.flaky", 1, json!({}))])
        .await;

    assert_eq!(state, EventState::RolledBack);
    let txs = h
        .coordinator
        .list_event_transactions(event_id)
        .await
        .unwrap();
    assert_eq!(txs[0].state, TransactionState::Failed);
}

/// Blocks until cancelled.
struct Stall;

#[async_trait]
impl TransactionExecutor for Stall {
    async fn execute(&self, _tx: &Transaction) -> Result<JsonValue, ExecutorError> {
        tokio::time::sleep(Duration::from_secs(300)).await;
        Ok(json!({}))
    }

    async fn compensate(&self, _tx: &Transaction) -> Result<Option<JsonValue>, ExecutorError> {
        Ok(None)
    }
}

#[tokio::test]
async fn cancel_event_aborts_execution_and_compensates() {
    let h = Harness::new().await;
    h.registry.register("test.stall", Arc::new(Stall));

    let event = h
        .coordinator
        .create_event("stalling", None, None, json!({}))
        .await
        .unwrap();
    h.coordinator
        .add_transaction(event.id, Harness::spec("test.stall", 1, json!({})))
        .await
        .unwrap();
    h.coordinator.validate_event(event.id).await.unwrap();
    h.coordinator.start_event(event.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.coordinator.cancel_event(event.id).await.unwrap();

    assert_eq!(h.wait_terminal(event.id).await, EventState::RolledBack);
    let event = h.coordinator.get_event(event.id).await.unwrap();
    assert!(event.error.as_deref().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn sweeper_unwinds_events_past_their_timeout() {
    let h = Harness::new().await;
    h.registry.register("test.stall", Arc::new(Stall));

    let event = h
        .coordinator
        .create_event(
            "overdue",
            None,
            Some(Duration::from_millis(50)),
            json!({}),
        )
        .await
        .unwrap();
    h.coordinator
        .add_transaction(event.id, Harness::spec("test.stall", 1, json!({})))
        .await
        .unwrap();
    h.coordinator.validate_event(event.id).await.unwrap();
    h.coordinator.start_event(event.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let sweeper = Sweeper::new(h.events.clone(), h.liens.clone(), h.coordinator.clone());
    sweeper.sweep_once().await;

    assert_eq!(h.wait_terminal(event.id).await, EventState::RolledBack);
}

#[tokio::test]
async fn compensating_a_transfer_restores_original_balances() {
    let h = Harness::new().await;
    let a = h.wallet("a", "USD").await;
    let b = h.wallet("b", "USD").await;
    h.seed(a, dec!(100)).await;

    let (event_id, state) = h
        .run_event(vec![Harness::spec(
            "wallet.transfer",
            1,
            json!({
                "source_account_id": a,
                "destination_account_id": b,
                "amount": "30",
                "currency": "USD",
            }),
        )])
        .await;
    assert_eq!(state, EventState::Completed);

    h.coordinator.compensate_event(event_id).await.unwrap();
    assert_eq!(h.balance(a).await, dec!(100));
    assert_eq!(h.balance(b).await, dec!(0));

    let txs = h
        .coordinator
        .list_event_transactions(event_id)
        .await
        .unwrap();
    assert_eq!(txs[0].state, TransactionState::Compensated);
}
