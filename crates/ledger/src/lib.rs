//! Double-entry ledger: accounts, balanced entries, stores, and the posting
//! service.
//!
//! The ledger never stores balances; they are derived from entry lines. All
//! mutation goes through [`LedgerService`], which validates the double-entry
//! invariants before anything reaches a store.

pub mod account;
pub mod entry;
pub mod memory;
pub mod service;
pub mod store;

pub use account::{Account, AccountKind};
pub use entry::{Entry, EntryLine, EntryStatus};
pub use service::{
    DepositArgs, ExchangeArgs, FeeArgs, LedgerError, LedgerService, TransferArgs, WithdrawalArgs,
};
pub use store::{AccountStore, BalanceTotals, EntryPage, EntryStore, StoreError};
