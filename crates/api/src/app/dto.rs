//! Request/response DTOs and JSON mapping helpers.
//!
//! Monetary values serialize as decimal strings with up to four fractional
//! digits; timestamps are RFC 3339.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use cascade_core::{AccountId, TransactionId, UserId};
use cascade_engine::{Event, Lien, Transaction};
use cascade_ledger::{Account, Entry, EntryLine};

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PostEntryLineRequest {
    pub account_id: AccountId,
    #[serde(default)]
    pub debit: Option<Decimal>,
    #[serde(default)]
    pub credit: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct PostEntryRequest {
    pub description: String,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    pub lines: Vec<PostEntryLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct ListAccountsQuery {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct AddTransactionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub order: i32,
    #[serde(default)]
    pub dependencies: Vec<TransactionId>,
    pub payload: JsonValue,
}

pub fn account_to_json(account: &Account) -> JsonValue {
    json!({
        "id": account.id,
        "name": account.name,
        "type": account.kind.as_str(),
        "user_id": account.owner_id,
        "currency": account.currency,
        "deleted": account.deleted,
        "created_at": account.created_at,
        "updated_at": account.updated_at,
    })
}

pub fn line_to_json(line: &EntryLine) -> JsonValue {
    json!({
        "id": line.id,
        "account_id": line.account_id,
        "debit": line.debit,
        "credit": line.credit,
        "created_at": line.created_at,
    })
}

pub fn entry_to_json(entry: &Entry) -> JsonValue {
    json!({
        "id": entry.id,
        "description": entry.description,
        "date": entry.date,
        "transaction_type": entry.transaction_type,
        "reference_id": entry.reference_id,
        "status": entry.status.as_str(),
        "event_id": entry.event_id,
        "lines": entry.lines.iter().map(line_to_json).collect::<Vec<_>>(),
        "created_at": entry.created_at,
        "updated_at": entry.updated_at,
    })
}

pub fn event_to_json(event: &Event) -> JsonValue {
    json!({
        "id": event.id,
        "name": event.name,
        "description": event.description,
        "state": event.state.as_str(),
        "timeout_secs": event.timeout.map(|t| t.as_secs()),
        "metadata": event.metadata,
        "error": event.error,
        "created_at": event.created_at,
        "updated_at": event.updated_at,
        "completed_at": event.completed_at,
    })
}

pub fn transaction_to_json(tx: &Transaction) -> JsonValue {
    json!({
        "id": tx.id,
        "event_id": tx.event_id,
        "name": tx.name,
        "type": tx.kind,
        "state": tx.state.as_str(),
        "order": tx.order,
        "dependencies": tx.dependencies,
        "payload": tx.payload,
        "result": tx.result,
        "error": tx.error,
        "started_at": tx.started_at,
        "completed_at": tx.completed_at,
        "created_at": tx.created_at,
        "updated_at": tx.updated_at,
    })
}

pub fn lien_to_json(lien: &Lien) -> JsonValue {
    json!({
        "id": lien.id,
        "event_id": lien.event_id,
        "account_id": lien.account_id,
        "amount": lien.amount,
        "currency": lien.currency,
        "state": lien.state.as_str(),
        "expires_at": lien.expires_at,
        "metadata": lien.metadata,
        "created_at": lien.created_at,
        "updated_at": lien.updated_at,
    })
}
