//! `wallet.deposit`: move funds from the deposit clearing account into a
//! wallet.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use cascade_core::{AccountId, EntryId};
use cascade_ledger::{DepositArgs, Entry, EntryLine, LedgerService};

use crate::error::ExecutorError;
use crate::event::Transaction;
use crate::executors::{parse_payload, to_json, SystemAccounts};
use crate::registry::TransactionExecutor;

#[derive(Debug, Clone, Deserialize)]
pub struct WalletDepositPayload {
    pub account_id: AccountId,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletDepositResult {
    pub entry_id: EntryId,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

pub struct WalletDepositExecutor {
    ledger: Arc<LedgerService>,
    system: Arc<SystemAccounts>,
}

impl WalletDepositExecutor {
    pub fn new(ledger: Arc<LedgerService>, system: Arc<SystemAccounts>) -> Self {
        Self { ledger, system }
    }
}

#[async_trait]
impl TransactionExecutor for WalletDepositExecutor {
    async fn execute(&self, tx: &Transaction) -> Result<JsonValue, ExecutorError> {
        let payload: WalletDepositPayload = parse_payload(tx)?;

        let entry = self
            .ledger
            .deposit(DepositArgs {
                entry_id: EntryId::derived(tx.id.as_uuid(), "deposit"),
                clearing: self.system.deposit_clearing,
                account: payload.account_id,
                amount: payload.amount,
                currency: payload.currency,
                reference: payload
                    .reference
                    .or_else(|| Some(format!("CTE-{}", tx.id))),
                event_id: Some(tx.event_id),
            })
            .await?;

        to_json(&WalletDepositResult {
            entry_id: entry.id,
            status: "COMPLETED".to_string(),
            processed_at: Utc::now(),
        })
    }

    async fn compensate(&self, tx: &Transaction) -> Result<Option<JsonValue>, ExecutorError> {
        match &tx.result {
            // The execution recorded which entry it posted: reverse it.
            Some(value) => {
                let mut result: WalletDepositResult = serde_json::from_value(value.clone())
                    .map_err(|e| ExecutorError::Payload(e.to_string()))?;
                self.ledger.reverse_entry(result.entry_id).await?;
                result.status = "REVERSED".to_string();
                result.processed_at = Utc::now();
                Ok(Some(to_json(&result)?))
            }
            // No recorded result: post the inverse shape directly, keyed on
            // the transaction id so repeats collapse.
            None => {
                let payload: WalletDepositPayload = parse_payload(tx)?;
                let reference = payload
                    .reference
                    .clone()
                    .unwrap_or_else(|| format!("CTE-{}", tx.id));
                let entry = Entry::new(
                    EntryId::derived(tx.id.as_uuid(), "deposit-rev"),
                    format!("Reversal of deposit to {}", payload.account_id),
                    "reversal",
                    Some(format!("REV-{reference}")),
                    Some(tx.event_id),
                    vec![
                        EntryLine::debit(payload.account_id, payload.amount),
                        EntryLine::credit(self.system.deposit_clearing, payload.amount),
                    ],
                );
                let entry = self.ledger.post_entry(entry).await?;
                Ok(Some(to_json(&WalletDepositResult {
                    entry_id: entry.id,
                    status: "REVERSED".to_string(),
                    processed_at: Utc::now(),
                })?))
            }
        }
    }
}
