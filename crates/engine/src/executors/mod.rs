//! Built-in transaction executors.
//!
//! Each executor parses a structured payload from the transaction, performs a
//! bounded sequence of ledger operations, records a structured result, and
//! defines a deterministic compensation. Entry ids are derived from the
//! transaction id, so re-executing the same transaction never duplicates a
//! ledger effect.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use cascade_core::{AccountId, DomainError};
use cascade_ledger::LedgerService;

use crate::error::ExecutorError;
use crate::event::Transaction;
use crate::lien_manager::LienManager;
use crate::registry::ExecutorRegistry;

pub mod batch;
pub mod deposit;
pub mod exchange;
pub mod transfer;
pub mod withdrawal;

pub use batch::BatchOperationExecutor;
pub use deposit::WalletDepositExecutor;
pub use exchange::CurrencyExchangeExecutor;
pub use transfer::WalletTransferExecutor;
pub use withdrawal::WalletWithdrawalExecutor;

/// Designated platform accounts the executors post against.
#[derive(Debug, Clone)]
pub struct SystemAccounts {
    pub deposit_clearing: AccountId,
    pub withdrawal_clearing: AccountId,
    pub fee_revenue: AccountId,
    fx_holding: HashMap<String, AccountId>,
}

impl SystemAccounts {
    pub fn new(
        deposit_clearing: AccountId,
        withdrawal_clearing: AccountId,
        fee_revenue: AccountId,
    ) -> Self {
        Self {
            deposit_clearing,
            withdrawal_clearing,
            fee_revenue,
            fx_holding: HashMap::new(),
        }
    }

    /// Register the FX holding account for a currency.
    pub fn with_fx_holding(mut self, currency: impl Into<String>, account: AccountId) -> Self {
        self.fx_holding.insert(currency.into(), account);
        self
    }

    pub fn fx_holding(&self, currency: &str) -> Result<AccountId, DomainError> {
        self.fx_holding.get(currency).copied().ok_or_else(|| {
            DomainError::validation(format!("no FX holding account for currency '{currency}'"))
        })
    }
}

/// Register all built-in executors under their type tags.
pub fn register_builtin_executors(
    registry: &Arc<ExecutorRegistry>,
    ledger: Arc<LedgerService>,
    liens: Arc<LienManager>,
    system: Arc<SystemAccounts>,
) {
    registry.register(
        "batch.operation",
        Arc::new(BatchOperationExecutor::new(registry.clone())),
    );
    registry.register(
        "wallet.transfer",
        Arc::new(WalletTransferExecutor::new(ledger.clone())),
    );
    registry.register(
        "wallet.deposit",
        Arc::new(WalletDepositExecutor::new(ledger.clone(), system.clone())),
    );
    registry.register(
        "wallet.withdrawal",
        Arc::new(WalletWithdrawalExecutor::new(
            ledger.clone(),
            liens,
            system.clone(),
        )),
    );
    registry.register(
        "wallet.exchange",
        Arc::new(CurrencyExchangeExecutor::new(ledger, system)),
    );
}

pub(crate) fn parse_payload<T: DeserializeOwned>(tx: &Transaction) -> Result<T, ExecutorError> {
    serde_json::from_value(tx.payload.clone())
        .map_err(|e| ExecutorError::Payload(format!("transaction {}: {e}", tx.id)))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, ExecutorError> {
    serde_json::to_value(value).map_err(|e| ExecutorError::Payload(e.to_string()))
}
