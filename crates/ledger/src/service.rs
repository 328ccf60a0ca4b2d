//! Posting service: the single write path into the ledger.
//!
//! Validates the double-entry shape, resolves accounts, and persists through
//! the store traits. Wallet-level helpers (deposit, withdrawal, transfer,
//! exchange, fee) build the canonical line shapes used by the engine's
//! executors; all of them post through [`LedgerService::post_entry`], which is
//! idempotent on the entry id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, instrument};

use cascade_core::{AccountId, DomainError, EntryId, EventId, UserId};

use crate::account::{validate_currency, Account};
use crate::entry::{Entry, EntryLine, EntryStatus};
use crate::store::{AccountStore, EntryPage, EntryStore, StoreError};

/// Error surfaced by the posting service: either a deterministic domain
/// failure or an infrastructure fault.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Whether a retry could plausibly succeed. Domain failures are
    /// deterministic; only backend faults are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Store(StoreError::Database(_)))
    }
}

/// Arguments for a two-line transfer entry (debit source, credit
/// destination).
#[derive(Debug, Clone)]
pub struct TransferArgs {
    pub entry_id: EntryId,
    pub source: AccountId,
    pub destination: AccountId,
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<String>,
    pub event_id: Option<EventId>,
}

/// Arguments for a deposit entry (debit clearing, credit target).
#[derive(Debug, Clone)]
pub struct DepositArgs {
    pub entry_id: EntryId,
    pub clearing: AccountId,
    pub account: AccountId,
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<String>,
    pub event_id: Option<EventId>,
}

/// Arguments for a withdrawal entry (debit holder, credit clearing).
#[derive(Debug, Clone)]
pub struct WithdrawalArgs {
    pub entry_id: EntryId,
    pub account: AccountId,
    pub clearing: AccountId,
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<String>,
    pub event_id: Option<EventId>,
}

/// Arguments for a four-line exchange entry routed through per-currency
/// holding accounts.
#[derive(Debug, Clone)]
pub struct ExchangeArgs {
    pub entry_id: EntryId,
    pub source: AccountId,
    pub source_holding: AccountId,
    pub destination_holding: AccountId,
    pub destination: AccountId,
    pub source_amount: Decimal,
    pub destination_amount: Decimal,
    pub source_currency: String,
    pub destination_currency: String,
    pub reference: Option<String>,
    pub event_id: Option<EventId>,
}

/// Arguments for a fee entry (debit payer, credit fee revenue).
#[derive(Debug, Clone)]
pub struct FeeArgs {
    pub entry_id: EntryId,
    pub account: AccountId,
    pub fee_account: AccountId,
    pub amount: Decimal,
    pub currency: String,
    pub reference: Option<String>,
    pub event_id: Option<EventId>,
}

/// The single write path into the ledger.
pub struct LedgerService {
    accounts: Arc<dyn AccountStore>,
    entries: Arc<dyn EntryStore>,
}

impl LedgerService {
    pub fn new(accounts: Arc<dyn AccountStore>, entries: Arc<dyn EntryStore>) -> Self {
        Self { accounts, entries }
    }

    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn create_account(&self, account: Account) -> Result<Account, LedgerError> {
        account.validate()?;
        match self.accounts.insert(&account).await {
            Ok(()) => {
                info!(account_id = %account.id, kind = account.kind.as_str(), "account created");
                Ok(account)
            }
            Err(StoreError::Conflict(msg)) => Err(DomainError::conflict(msg).into()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        Ok(self.accounts.get(id).await?)
    }

    pub async fn list_accounts_by_owner(&self, owner: UserId) -> Result<Vec<Account>, LedgerError> {
        Ok(self.accounts.list_by_owner(owner).await?)
    }

    /// Update mutable metadata (name only).
    #[instrument(skip(self, name), fields(account_id = %id))]
    pub async fn update_account_name(
        &self,
        id: AccountId,
        name: String,
    ) -> Result<Account, LedgerError> {
        let mut account = self.require_account(id).await?;
        account.name = name;
        account.updated_at = Utc::now();
        account.validate()?;
        self.accounts.update(&account).await?;
        Ok(account)
    }

    /// Soft-delete: the account stays readable for history but rejects new
    /// postings.
    #[instrument(skip(self), fields(account_id = %id))]
    pub async fn delete_account(&self, id: AccountId) -> Result<(), LedgerError> {
        let mut account = self.require_account(id).await?;
        account.deleted = true;
        account.updated_at = Utc::now();
        self.accounts.update(&account).await?;
        info!(account_id = %id, "account soft-deleted");
        Ok(())
    }

    async fn require_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.accounts
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("account {id}")).into())
    }

    /// Load an account and check it can take the given posting.
    async fn require_postable(
        &self,
        id: AccountId,
        currency: &str,
    ) -> Result<Account, LedgerError> {
        let account = self.require_account(id).await?;
        if account.deleted {
            return Err(DomainError::validation(format!("account {id} is deleted")).into());
        }
        if account.currency != currency {
            return Err(DomainError::validation(format!(
                "account {id} holds {}, not {currency}",
                account.currency
            ))
            .into());
        }
        Ok(account)
    }

    /// Validate and persist a balanced entry.
    ///
    /// Idempotent on the entry id: a store-level conflict means the same
    /// entry was already posted, so the persisted row is returned and no
    /// second side effect occurs.
    #[instrument(skip(self, entry), fields(entry_id = %entry.id, lines = entry.lines.len()))]
    pub async fn post_entry(&self, entry: Entry) -> Result<Entry, LedgerError> {
        entry.validate()?;

        let mut seen: Vec<AccountId> = Vec::with_capacity(entry.lines.len());
        for line in &entry.lines {
            if seen.contains(&line.account_id) {
                continue;
            }
            let account = self.require_account(line.account_id).await?;
            if account.deleted {
                return Err(DomainError::validation(format!(
                    "account {} is deleted",
                    line.account_id
                ))
                .into());
            }
            seen.push(line.account_id);
        }

        match self.entries.insert(&entry).await {
            Ok(()) => {
                info!(
                    entry_id = %entry.id,
                    transaction_type = %entry.transaction_type,
                    "entry posted"
                );
                Ok(entry)
            }
            Err(StoreError::Conflict(_)) => match self.entries.get(entry.id).await? {
                Some(existing) => Ok(existing),
                None => Err(StoreError::Conflict(format!("entry {}", entry.id)).into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>, LedgerError> {
        Ok(self.entries.get(id).await?)
    }

    pub async fn list_entries_by_date(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: u32,
        page_size: u32,
    ) -> Result<EntryPage, LedgerError> {
        if page < 1 {
            return Err(DomainError::validation("page must be >= 1").into());
        }
        if !(1..=100).contains(&page_size) {
            return Err(DomainError::validation("page_size must be in [1, 100]").into());
        }
        if end < start {
            return Err(DomainError::validation("end_date precedes start_date").into());
        }
        Ok(self.entries.list_by_date(start, end, page, page_size).await?)
    }

    /// Availability over posted lines: credits minus debits.
    pub async fn available_balance(&self, account: AccountId) -> Result<Decimal, LedgerError> {
        self.require_account(account).await?;
        let totals = self.entries.balance_totals(account).await?;
        Ok(totals.available())
    }

    /// Post the offsetting entry for a previously posted one.
    ///
    /// The original stays `posted` (corrections are new entries); the
    /// reversal's id is derived from the original's, so repeated reversal
    /// attempts collapse onto one row.
    #[instrument(skip(self), fields(entry_id = %original_id))]
    pub async fn reverse_entry(&self, original_id: EntryId) -> Result<Entry, LedgerError> {
        let original = self
            .entries
            .get(original_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("entry {original_id}")))?;

        if original.status != EntryStatus::Posted {
            return Err(DomainError::validation(format!(
                "entry {original_id} is not posted, cannot reverse"
            ))
            .into());
        }

        let reference = original
            .reference_id
            .clone()
            .unwrap_or_else(|| original.id.to_string());

        let reversal = Entry::new(
            EntryId::derived(original.id.as_uuid(), "rev"),
            format!("Reversal of {}", original.description),
            "reversal",
            Some(format!("REV-{reference}")),
            original.event_id,
            original.lines.iter().map(EntryLine::inverted).collect(),
        );

        self.post_entry(reversal).await
    }

    pub async fn transfer(&self, args: TransferArgs) -> Result<Entry, LedgerError> {
        ensure_positive(args.amount)?;
        validate_currency(&args.currency)?;
        if args.source == args.destination {
            return Err(
                DomainError::validation("source and destination accounts are the same").into(),
            );
        }
        self.require_postable(args.source, &args.currency).await?;
        self.require_postable(args.destination, &args.currency).await?;

        let entry = Entry::new(
            args.entry_id,
            format!("Transfer {} {}", args.amount, args.currency),
            "transfer",
            args.reference,
            args.event_id,
            vec![
                EntryLine::debit(args.source, args.amount),
                EntryLine::credit(args.destination, args.amount),
            ],
        );
        self.post_entry(entry).await
    }

    pub async fn deposit(&self, args: DepositArgs) -> Result<Entry, LedgerError> {
        ensure_positive(args.amount)?;
        validate_currency(&args.currency)?;
        self.require_postable(args.account, &args.currency).await?;
        self.require_account(args.clearing).await?;

        let entry = Entry::new(
            args.entry_id,
            format!("Deposit {} {}", args.amount, args.currency),
            "deposit",
            args.reference,
            args.event_id,
            vec![
                EntryLine::debit(args.clearing, args.amount),
                EntryLine::credit(args.account, args.amount),
            ],
        );
        self.post_entry(entry).await
    }

    pub async fn withdraw(&self, args: WithdrawalArgs) -> Result<Entry, LedgerError> {
        ensure_positive(args.amount)?;
        validate_currency(&args.currency)?;
        self.require_postable(args.account, &args.currency).await?;
        self.require_account(args.clearing).await?;

        let entry = Entry::new(
            args.entry_id,
            format!("Withdrawal {} {}", args.amount, args.currency),
            "withdrawal",
            args.reference,
            args.event_id,
            vec![
                EntryLine::debit(args.account, args.amount),
                EntryLine::credit(args.clearing, args.amount),
            ],
        );
        self.post_entry(entry).await
    }

    pub async fn exchange(&self, args: ExchangeArgs) -> Result<Entry, LedgerError> {
        ensure_positive(args.source_amount)?;
        ensure_positive(args.destination_amount)?;
        validate_currency(&args.source_currency)?;
        validate_currency(&args.destination_currency)?;
        self.require_postable(args.source, &args.source_currency).await?;
        self.require_postable(args.destination, &args.destination_currency)
            .await?;
        self.require_account(args.source_holding).await?;
        self.require_account(args.destination_holding).await?;

        // Mixed-currency entry: each holding leg mirrors its user leg, so
        // debits and credits still sum equal.
        let entry = Entry::new(
            args.entry_id,
            format!(
                "Exchange {} {} -> {} {}",
                args.source_amount,
                args.source_currency,
                args.destination_amount,
                args.destination_currency
            ),
            "exchange",
            args.reference,
            args.event_id,
            vec![
                EntryLine::debit(args.source, args.source_amount),
                EntryLine::credit(args.source_holding, args.source_amount),
                EntryLine::debit(args.destination_holding, args.destination_amount),
                EntryLine::credit(args.destination, args.destination_amount),
            ],
        );
        self.post_entry(entry).await
    }

    pub async fn charge_fee(&self, args: FeeArgs) -> Result<Entry, LedgerError> {
        ensure_positive(args.amount)?;
        validate_currency(&args.currency)?;
        self.require_postable(args.account, &args.currency).await?;
        self.require_account(args.fee_account).await?;

        let entry = Entry::new(
            args.entry_id,
            format!("Fee {} {}", args.amount, args.currency),
            "fee",
            args.reference,
            args.event_id,
            vec![
                EntryLine::debit(args.account, args.amount),
                EntryLine::credit(args.fee_account, args.amount),
            ],
        );
        self.post_entry(entry).await
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), DomainError> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::validation("amount must be greater than zero"));
    }
    Ok(())
}
