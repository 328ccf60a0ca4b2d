//! `wallet.withdrawal`: reserve, post, release.
//!
//! The lien is the overdraft guard: creation is serialized per account, so
//! two concurrent withdrawals cannot both pass the sufficiency check against
//! the same balance.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use cascade_core::{AccountId, EntryId, LienId};
use cascade_ledger::{LedgerService, WithdrawalArgs};

use crate::error::ExecutorError;
use crate::event::Transaction;
use crate::executors::{parse_payload, to_json, SystemAccounts};
use crate::lien_manager::LienManager;
use crate::registry::TransactionExecutor;

/// How long the reservation may sit before the sweeper reclaims it.
const LIEN_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct WalletWithdrawalPayload {
    pub account_id: AccountId,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletWithdrawalResult {
    pub entry_id: EntryId,
    pub lien_id: LienId,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

pub struct WalletWithdrawalExecutor {
    ledger: Arc<LedgerService>,
    liens: Arc<LienManager>,
    system: Arc<SystemAccounts>,
}

impl WalletWithdrawalExecutor {
    pub fn new(
        ledger: Arc<LedgerService>,
        liens: Arc<LienManager>,
        system: Arc<SystemAccounts>,
    ) -> Self {
        Self {
            ledger,
            liens,
            system,
        }
    }
}

#[async_trait]
impl TransactionExecutor for WalletWithdrawalExecutor {
    async fn execute(&self, tx: &Transaction) -> Result<JsonValue, ExecutorError> {
        let payload: WalletWithdrawalPayload = parse_payload(tx)?;

        // 1. Reserve the funds. An insufficient balance fails here, before
        //    anything touches the ledger.
        let lien = self
            .liens
            .create_lien(
                tx.event_id,
                payload.account_id,
                payload.amount,
                &payload.currency,
                Utc::now() + chrono::Duration::minutes(LIEN_TTL_MINUTES),
                json!({ "transaction_id": tx.id }),
            )
            .await?;
        let lien = self.liens.activate_lien(lien.id).await?;

        // 2. Post the movement. If it fails, take the reservation back out
        //    of circulation before surfacing the error.
        let entry = match self
            .ledger
            .withdraw(WithdrawalArgs {
                entry_id: EntryId::derived(tx.id.as_uuid(), "withdrawal"),
                account: payload.account_id,
                clearing: self.system.withdrawal_clearing,
                amount: payload.amount,
                currency: payload.currency,
                reference: payload
                    .reference
                    .or_else(|| Some(format!("CTE-{}", tx.id))),
                event_id: Some(tx.event_id),
            })
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                if let Err(undo) = self.liens.expire_lien(lien.id).await {
                    warn!(lien_id = %lien.id, error = %undo, "failed to expire lien after withdrawal failure");
                }
                return Err(e.into());
            }
        };

        // 3. The funds left the account; the reservation has done its job.
        let lien = self.liens.release_lien(lien.id).await?;

        to_json(&WalletWithdrawalResult {
            entry_id: entry.id,
            lien_id: lien.id,
            status: "COMPLETED".to_string(),
            processed_at: Utc::now(),
        })
    }

    async fn compensate(&self, tx: &Transaction) -> Result<Option<JsonValue>, ExecutorError> {
        let updated = match &tx.result {
            Some(value) => {
                let mut result: WalletWithdrawalResult = serde_json::from_value(value.clone())
                    .map_err(|e| ExecutorError::Payload(e.to_string()))?;
                self.ledger.reverse_entry(result.entry_id).await?;
                result.status = "REVERSED".to_string();
                result.processed_at = Utc::now();
                Some(to_json(&result)?)
            }
            None => None,
        };

        // Close any reservation this event still holds on the account.
        self.liens.release_open_liens(tx.event_id).await?;
        Ok(updated)
    }
}
