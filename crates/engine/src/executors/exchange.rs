//! `wallet.exchange`: a four-line entry through per-currency FX holding
//! accounts, plus an optional fee entry.
//!
//! The result records both entry ids so compensation can reverse the fee and
//! the exchange precisely, in reverse order of creation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use cascade_core::{AccountId, EntryId};
use cascade_ledger::{ExchangeArgs, FeeArgs, LedgerService};

use crate::error::ExecutorError;
use crate::event::Transaction;
use crate::executors::{parse_payload, to_json, SystemAccounts};
use crate::registry::TransactionExecutor;

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyExchangePayload {
    pub source_account_id: AccountId,
    pub source_currency: String,
    pub source_amount: Decimal,
    pub destination_account_id: AccountId,
    pub destination_currency: String,
    pub exchange_rate: Decimal,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub fee_account_id: Option<AccountId>,
    #[serde(default)]
    pub fee_amount: Option<Decimal>,
    #[serde(default)]
    pub fee_currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyExchangeResult {
    pub exchange_entry_id: EntryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_entry_id: Option<EntryId>,
    pub source_amount: Decimal,
    pub destination_amount: Decimal,
    pub exchange_rate: Decimal,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

pub struct CurrencyExchangeExecutor {
    ledger: Arc<LedgerService>,
    system: Arc<SystemAccounts>,
}

impl CurrencyExchangeExecutor {
    pub fn new(ledger: Arc<LedgerService>, system: Arc<SystemAccounts>) -> Self {
        Self { ledger, system }
    }
}

#[async_trait]
impl TransactionExecutor for CurrencyExchangeExecutor {
    async fn execute(&self, tx: &Transaction) -> Result<JsonValue, ExecutorError> {
        let payload: CurrencyExchangePayload = parse_payload(tx)?;

        if payload.exchange_rate <= Decimal::ZERO {
            return Err(ExecutorError::Payload(
                "exchange_rate must be greater than zero".to_string(),
            ));
        }
        let fee = match payload.fee_amount {
            Some(amount) if amount > Decimal::ZERO => {
                let account = payload.fee_account_id.ok_or_else(|| {
                    ExecutorError::Payload(
                        "fee_account_id is required when fee_amount is set".to_string(),
                    )
                })?;
                let currency = payload.fee_currency.clone().ok_or_else(|| {
                    ExecutorError::Payload(
                        "fee_currency is required when fee_amount is set".to_string(),
                    )
                })?;
                Some((account, amount, currency))
            }
            _ => None,
        };

        let destination_amount = (payload.source_amount * payload.exchange_rate).round_dp(4);
        let source_holding = self.system.fx_holding(&payload.source_currency)?;
        let destination_holding = self.system.fx_holding(&payload.destination_currency)?;

        let reference = payload
            .reference
            .clone()
            .unwrap_or_else(|| format!("CTE-{}", tx.id));

        let exchange_entry = self
            .ledger
            .exchange(ExchangeArgs {
                entry_id: EntryId::derived(tx.id.as_uuid(), "exchange"),
                source: payload.source_account_id,
                source_holding,
                destination_holding,
                destination: payload.destination_account_id,
                source_amount: payload.source_amount,
                destination_amount,
                source_currency: payload.source_currency.clone(),
                destination_currency: payload.destination_currency.clone(),
                reference: Some(reference.clone()),
                event_id: Some(tx.event_id),
            })
            .await?;

        let fee_entry_id = match fee {
            Some((fee_account, fee_amount, fee_currency)) => {
                let charged = self
                    .ledger
                    .charge_fee(FeeArgs {
                        entry_id: EntryId::derived(tx.id.as_uuid(), "fee"),
                        account: payload.source_account_id,
                        fee_account,
                        amount: fee_amount,
                        currency: fee_currency,
                        reference: Some(format!("Exchange fee for {reference}")),
                        event_id: Some(tx.event_id),
                    })
                    .await;
                match charged {
                    Ok(entry) => Some(entry.id),
                    Err(e) => {
                        // Unwind the exchange leg before surfacing the fee
                        // failure, so a failed step leaves no half-applied
                        // exchange behind.
                        if let Err(undo) = self.ledger.reverse_entry(exchange_entry.id).await {
                            warn!(
                                entry_id = %exchange_entry.id,
                                error = %undo,
                                "failed to unwind exchange entry after fee failure"
                            );
                        }
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        to_json(&CurrencyExchangeResult {
            exchange_entry_id: exchange_entry.id,
            fee_entry_id,
            source_amount: payload.source_amount,
            destination_amount,
            exchange_rate: payload.exchange_rate,
            status: "COMPLETED".to_string(),
            processed_at: Utc::now(),
        })
    }

    async fn compensate(&self, tx: &Transaction) -> Result<Option<JsonValue>, ExecutorError> {
        let Some(value) = &tx.result else {
            return Ok(None);
        };
        let mut result: CurrencyExchangeResult = serde_json::from_value(value.clone())
            .map_err(|e| ExecutorError::Payload(e.to_string()))?;

        // Reverse in reverse order of creation: fee first, then exchange.
        if let Some(fee_entry_id) = result.fee_entry_id {
            self.ledger.reverse_entry(fee_entry_id).await?;
        }
        self.ledger.reverse_entry(result.exchange_entry_id).await?;

        result.status = "REVERSED".to_string();
        result.processed_at = Utc::now();
        Ok(Some(to_json(&result)?))
    }
}
