//! Store capability traits for the ledger, plus the shared store error.
//!
//! Traits make no storage assumptions: in-memory realizations live in
//! [`crate::memory`] and are used for tests and dev; PostgreSQL realizations
//! live in the infra crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use cascade_core::{AccountId, EntryId, UserId};

use crate::account::Account;
use crate::entry::Entry;

/// Infrastructure-level store failure, shared by every store trait in the
/// workspace.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Duplicate identifier or concurrent write collision.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The targeted record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend failure (connection, query, transaction).
    #[error("database error: {0}")]
    Database(String),

    /// Row ↔ domain mapping failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Raw debit/credit totals over an account's posted lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceTotals {
    pub debits: Decimal,
    pub credits: Decimal,
}

impl BalanceTotals {
    /// Deposit-account availability: credits minus debits.
    pub fn available(&self) -> Decimal {
        self.credits - self.debits
    }
}

/// One page of a date-ordered entry listing.
#[derive(Debug, Clone)]
pub struct EntryPage {
    pub entries: Vec<Entry>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Fails with [`StoreError::Conflict`] on a
    /// duplicate identifier.
    async fn insert(&self, account: &Account) -> Result<(), StoreError>;

    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Account>, StoreError>;

    /// Overwrite an existing account. Fails with [`StoreError::NotFound`]
    /// when absent.
    async fn update(&self, account: &Account) -> Result<(), StoreError>;
}

#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Persist an entry with all of its lines atomically: a concurrent
    /// balance query sees either the full entry or none of it. Fails with
    /// [`StoreError::Conflict`] on a duplicate entry id.
    async fn insert(&self, entry: &Entry) -> Result<(), StoreError>;

    async fn get(&self, id: EntryId) -> Result<Option<Entry>, StoreError>;

    /// Entries whose business date falls in `[start, end]`, newest first.
    /// `page` is 1-based; callers bound `page_size` before calling.
    async fn list_by_date(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: u32,
        page_size: u32,
    ) -> Result<EntryPage, StoreError>;

    /// Debit/credit totals across all posted lines on the account.
    async fn balance_totals(&self, account: AccountId) -> Result<BalanceTotals, StoreError>;
}
