//! In-memory ledger stores.
//!
//! Intended for tests and dev. Whole-map locking keeps entry insertion and
//! balance aggregation mutually atomic, which is all the contract asks for.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cascade_core::{AccountId, EntryId, UserId};

use crate::account::Account;
use crate::entry::{Entry, EntryStatus};
use crate::store::{AccountStore, BalanceTotals, EntryPage, EntryStore, StoreError};

fn poisoned() -> StoreError {
    StoreError::Database("lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        if accounts.contains_key(&account.id) {
            return Err(StoreError::Conflict(format!(
                "account {} already exists",
                account.id
            )));
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().map_err(|_| poisoned())?;
        Ok(accounts.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Account>, StoreError> {
        let accounts = self.accounts.read().map_err(|_| poisoned())?;
        let mut out: Vec<Account> = accounts
            .values()
            .filter(|a| a.owner_id == Some(owner))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn update(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        match accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("account {}", account.id))),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEntryStore {
    entries: RwLock<HashMap<EntryId, Entry>>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn insert(&self, entry: &Entry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if entries.contains_key(&entry.id) {
            return Err(StoreError::Conflict(format!(
                "entry {} already exists",
                entry.id
            )));
        }
        entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get(&self, id: EntryId) -> Result<Option<Entry>, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(&id).cloned())
    }

    async fn list_by_date(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: u32,
        page_size: u32,
    ) -> Result<EntryPage, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut matching: Vec<Entry> = entries
            .values()
            .filter(|e| e.date >= start && e.date <= end)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.date.cmp(&a.date));

        let total = matching.len() as u64;
        let offset = (page.saturating_sub(1) as usize) * page_size as usize;
        let entries = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();

        Ok(EntryPage {
            entries,
            total,
            page,
            page_size,
        })
    }

    async fn balance_totals(&self, account: AccountId) -> Result<BalanceTotals, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut totals = BalanceTotals::default();
        for entry in entries.values() {
            if entry.status != EntryStatus::Posted {
                continue;
            }
            for line in &entry.lines {
                if line.account_id == account {
                    totals.debits += line.debit;
                    totals.credits += line.credit;
                }
            }
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountKind;
    use crate::entry::EntryLine;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn duplicate_account_insert_conflicts() {
        let store = InMemoryAccountStore::new();
        let acc = Account::new(AccountId::new(), "Cash", AccountKind::Asset, None, "USD");
        store.insert(&acc).await.unwrap();
        let err = store.insert(&acc).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn balance_totals_only_count_posted_lines() {
        let store = InMemoryEntryStore::new();
        let account = AccountId::new();
        let other = AccountId::new();

        let posted = Entry::new(
            EntryId::new(),
            "seed",
            "deposit",
            None,
            None,
            vec![
                EntryLine::debit(other, dec!(100)),
                EntryLine::credit(account, dec!(100)),
            ],
        );
        store.insert(&posted).await.unwrap();

        let mut voided = Entry::new(
            EntryId::new(),
            "bad",
            "deposit",
            None,
            None,
            vec![
                EntryLine::debit(other, dec!(7)),
                EntryLine::credit(account, dec!(7)),
            ],
        );
        voided.status = EntryStatus::Voided;
        store.insert(&voided).await.unwrap();

        let totals = store.balance_totals(account).await.unwrap();
        assert_eq!(totals.credits, dec!(100));
        assert_eq!(totals.debits, dec!(0));
        assert_eq!(totals.available(), dec!(100));
    }

    #[tokio::test]
    async fn listing_pages_newest_first() {
        let store = InMemoryEntryStore::new();
        let a = AccountId::new();
        let b = AccountId::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut entry = Entry::new(
                EntryId::new(),
                format!("e{i}"),
                "transfer",
                None,
                None,
                vec![
                    EntryLine::debit(a, dec!(1)),
                    EntryLine::credit(b, dec!(1)),
                ],
            );
            entry.date = Utc::now() + chrono::Duration::seconds(i);
            ids.push(entry.id);
            store.insert(&entry).await.unwrap();
        }

        let page = store
            .list_by_date(
                Utc::now() - chrono::Duration::hours(1),
                Utc::now() + chrono::Duration::hours(1),
                1,
                2,
            )
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].id, ids[4]);
    }
}
