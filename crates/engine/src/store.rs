//! Persistence capability traits for events, transactions, and liens.
//!
//! The coordinator and lien manager consume these; in-memory realizations
//! live in [`crate::memory`], PostgreSQL realizations in the infra crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cascade_core::{AccountId, EventId, LienId, TransactionId};
use cascade_ledger::StoreError;

use crate::event::{Event, EventState, Transaction};
use crate::lien::Lien;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a new event. [`StoreError::Conflict`] on a duplicate id.
    async fn save_event(&self, event: &Event) -> Result<(), StoreError>;

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    /// Overwrite an existing event. [`StoreError::NotFound`] when absent.
    async fn update_event(&self, event: &Event) -> Result<(), StoreError>;

    async fn list_events_by_state(&self, state: EventState) -> Result<Vec<Event>, StoreError>;

    /// Remove an event and everything it owns (transactions, liens). The
    /// coordinator only permits this before the event starts.
    async fn delete_event(&self, id: EventId) -> Result<(), StoreError>;

    async fn save_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    async fn update_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;

    /// All transactions of an event, ordered by `order` ascending (ties by
    /// creation time).
    async fn list_event_transactions(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Transaction>, StoreError>;
}

#[async_trait]
pub trait LienStore: Send + Sync {
    async fn save_lien(&self, lien: &Lien) -> Result<(), StoreError>;

    async fn get_lien(&self, id: LienId) -> Result<Option<Lien>, StoreError>;

    async fn update_lien(&self, lien: &Lien) -> Result<(), StoreError>;

    async fn list_by_event(&self, event_id: EventId) -> Result<Vec<Lien>, StoreError>;

    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Lien>, StoreError>;

    /// Pending or active liens whose expiry is at or before `now`.
    async fn list_expiring(&self, now: DateTime<Utc>) -> Result<Vec<Lien>, StoreError>;
}
