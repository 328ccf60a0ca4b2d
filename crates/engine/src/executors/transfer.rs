//! `wallet.transfer`: a two-line entry moving funds between wallets.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use cascade_core::{AccountId, EntryId};
use cascade_ledger::{LedgerService, TransferArgs};

use crate::error::ExecutorError;
use crate::event::Transaction;
use crate::executors::{parse_payload, to_json};
use crate::registry::TransactionExecutor;

#[derive(Debug, Clone, Deserialize)]
pub struct WalletTransferPayload {
    pub source_account_id: AccountId,
    pub destination_account_id: AccountId,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransferResult {
    pub entry_id: EntryId,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

pub struct WalletTransferExecutor {
    ledger: Arc<LedgerService>,
}

impl WalletTransferExecutor {
    pub fn new(ledger: Arc<LedgerService>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl TransactionExecutor for WalletTransferExecutor {
    async fn execute(&self, tx: &Transaction) -> Result<JsonValue, ExecutorError> {
        let payload: WalletTransferPayload = parse_payload(tx)?;

        let entry = self
            .ledger
            .transfer(TransferArgs {
                entry_id: EntryId::derived(tx.id.as_uuid(), "transfer"),
                source: payload.source_account_id,
                destination: payload.destination_account_id,
                amount: payload.amount,
                currency: payload.currency,
                reference: payload
                    .reference
                    .or_else(|| Some(format!("CTE-{}", tx.id))),
                event_id: Some(tx.event_id),
            })
            .await?;

        to_json(&WalletTransferResult {
            entry_id: entry.id,
            status: "COMPLETED".to_string(),
            processed_at: Utc::now(),
        })
    }

    async fn compensate(&self, tx: &Transaction) -> Result<Option<JsonValue>, ExecutorError> {
        let Some(value) = &tx.result else {
            // Nothing was posted; nothing to undo.
            return Ok(None);
        };
        let mut result: WalletTransferResult = serde_json::from_value(value.clone())
            .map_err(|e| ExecutorError::Payload(e.to_string()))?;

        // Reversal swaps the debit/credit sides: funds flow back from
        // destination to source under a REV- reference.
        self.ledger.reverse_entry(result.entry_id).await?;
        result.status = "REVERSED".to_string();
        result.processed_at = Utc::now();
        Ok(Some(to_json(&result)?))
    }
}
