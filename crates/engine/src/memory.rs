//! In-memory event and lien stores for tests and dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cascade_core::{AccountId, EventId, LienId, TransactionId};
use cascade_ledger::StoreError;

use crate::event::{Event, EventState, Transaction};
use crate::lien::Lien;
use crate::store::{EventStore, LienStore};

fn poisoned() -> StoreError {
    StoreError::Database("lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<HashMap<EventId, Event>>,
    transactions: RwLock<HashMap<TransactionId, Transaction>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut events = self.events.write().map_err(|_| poisoned())?;
        if events.contains_key(&event.id) {
            return Err(StoreError::Conflict(format!(
                "event {} already exists",
                event.id
            )));
        }
        events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let events = self.events.read().map_err(|_| poisoned())?;
        Ok(events.get(&id).cloned())
    }

    async fn update_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut events = self.events.write().map_err(|_| poisoned())?;
        match events.get_mut(&event.id) {
            Some(existing) => {
                *existing = event.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("event {}", event.id))),
        }
    }

    async fn list_events_by_state(&self, state: EventState) -> Result<Vec<Event>, StoreError> {
        let events = self.events.read().map_err(|_| poisoned())?;
        let mut out: Vec<Event> = events
            .values()
            .filter(|e| e.state == state)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn delete_event(&self, id: EventId) -> Result<(), StoreError> {
        let mut events = self.events.write().map_err(|_| poisoned())?;
        if events.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("event {id}")));
        }
        drop(events);
        let mut transactions = self.transactions.write().map_err(|_| poisoned())?;
        transactions.retain(|_, tx| tx.event_id != id);
        Ok(())
    }

    async fn save_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut transactions = self.transactions.write().map_err(|_| poisoned())?;
        if transactions.contains_key(&tx.id) {
            return Err(StoreError::Conflict(format!(
                "transaction {} already exists",
                tx.id
            )));
        }
        transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let transactions = self.transactions.read().map_err(|_| poisoned())?;
        Ok(transactions.get(&id).cloned())
    }

    async fn update_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut transactions = self.transactions.write().map_err(|_| poisoned())?;
        match transactions.get_mut(&tx.id) {
            Some(existing) => {
                *existing = tx.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("transaction {}", tx.id))),
        }
    }

    async fn list_event_transactions(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let transactions = self.transactions.read().map_err(|_| poisoned())?;
        let mut out: Vec<Transaction> = transactions
            .values()
            .filter(|tx| tx.event_id == event_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLienStore {
    liens: RwLock<HashMap<LienId, Lien>>,
}

impl InMemoryLienStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LienStore for InMemoryLienStore {
    async fn save_lien(&self, lien: &Lien) -> Result<(), StoreError> {
        let mut liens = self.liens.write().map_err(|_| poisoned())?;
        if liens.contains_key(&lien.id) {
            return Err(StoreError::Conflict(format!(
                "lien {} already exists",
                lien.id
            )));
        }
        liens.insert(lien.id, lien.clone());
        Ok(())
    }

    async fn get_lien(&self, id: LienId) -> Result<Option<Lien>, StoreError> {
        let liens = self.liens.read().map_err(|_| poisoned())?;
        Ok(liens.get(&id).cloned())
    }

    async fn update_lien(&self, lien: &Lien) -> Result<(), StoreError> {
        let mut liens = self.liens.write().map_err(|_| poisoned())?;
        match liens.get_mut(&lien.id) {
            Some(existing) => {
                *existing = lien.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("lien {}", lien.id))),
        }
    }

    async fn list_by_event(&self, event_id: EventId) -> Result<Vec<Lien>, StoreError> {
        let liens = self.liens.read().map_err(|_| poisoned())?;
        let mut out: Vec<Lien> = liens
            .values()
            .filter(|l| l.event_id == event_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Lien>, StoreError> {
        let liens = self.liens.read().map_err(|_| poisoned())?;
        let mut out: Vec<Lien> = liens
            .values()
            .filter(|l| l.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn list_expiring(&self, now: DateTime<Utc>) -> Result<Vec<Lien>, StoreError> {
        let liens = self.liens.read().map_err(|_| poisoned())?;
        Ok(liens
            .values()
            .filter(|l| l.state.is_reserving() && l.expires_at <= now)
            .cloned()
            .collect())
    }
}
