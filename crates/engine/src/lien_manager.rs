//! Lien manager: reservation lifecycle and event-aware availability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use cascade_core::{AccountId, EventId, LienId};
use cascade_ledger::account::validate_currency;
use cascade_ledger::LedgerService;

use crate::lien::{Lien, LienError, LienState};
use crate::store::LienStore;

/// Where the lien manager reads raw availability from.
///
/// Implemented by the ledger service; kept as a trait so tests can pin
/// balances without a ledger.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn available_balance(&self, account: AccountId) -> Result<Decimal, LienError>;
}

#[async_trait]
impl BalanceSource for LedgerService {
    async fn available_balance(&self, account: AccountId) -> Result<Decimal, LienError> {
        LedgerService::available_balance(self, account)
            .await
            .map_err(|e| LienError::Balance(e.to_string()))
    }
}

/// Manages fund reservations scoped to chained transaction events.
pub struct LienManager {
    store: Arc<dyn LienStore>,
    balances: Arc<dyn BalanceSource>,
    /// Serializes lien creation per account so concurrent reservations
    /// cannot both pass the sufficiency check against the same balance.
    account_locks: tokio::sync::Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LienManager {
    pub fn new(store: Arc<dyn LienStore>, balances: Arc<dyn BalanceSource>) -> Self {
        Self {
            store,
            balances,
            account_locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn account_lock(&self, account: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        locks.entry(account).or_default().clone()
    }

    /// Reserve `amount` on `account_id` for `event_id`.
    ///
    /// Fails with [`LienError::InsufficientFunds`] when the raw available
    /// balance minus all reserving liens on the account is less than
    /// `amount`. The new lien starts `Pending`.
    #[instrument(skip(self, metadata), fields(event_id = %event_id, account_id = %account_id, %amount))]
    pub async fn create_lien(
        &self,
        event_id: EventId,
        account_id: AccountId,
        amount: Decimal,
        currency: &str,
        expires_at: DateTime<Utc>,
        metadata: JsonValue,
    ) -> Result<Lien, LienError> {
        if amount <= Decimal::ZERO {
            return Err(LienError::InvalidInput(
                "amount must be greater than zero".to_string(),
            ));
        }
        validate_currency(currency).map_err(|e| LienError::InvalidInput(e.to_string()))?;
        if expires_at <= Utc::now() {
            return Err(LienError::InvalidInput(
                "expiration time must be in the future".to_string(),
            ));
        }

        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;

        let available = self.balances.available_balance(account_id).await?;
        let reserved = self.reserved_amount(account_id, None).await?;

        if available - reserved < amount {
            return Err(LienError::InsufficientFunds {
                available,
                reserved,
                requested: amount,
            });
        }

        let lien = Lien::new(event_id, account_id, amount, currency, expires_at, metadata);
        self.store.save_lien(&lien).await?;
        info!(lien_id = %lien.id, "lien created");
        Ok(lien)
    }

    pub async fn get_lien(&self, id: LienId) -> Result<Lien, LienError> {
        self.store
            .get_lien(id)
            .await?
            .ok_or(LienError::NotFound(id))
    }

    pub async fn list_liens_by_event(&self, event_id: EventId) -> Result<Vec<Lien>, LienError> {
        Ok(self.store.list_by_event(event_id).await?)
    }

    pub async fn list_liens_by_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Lien>, LienError> {
        Ok(self.store.list_by_account(account_id).await?)
    }

    /// `Pending -> Active`. A lien past its expiry is moved to `Expired`
    /// instead and the call fails.
    #[instrument(skip(self), fields(lien_id = %id))]
    pub async fn activate_lien(&self, id: LienId) -> Result<Lien, LienError> {
        let mut lien = self.get_lien(id).await?;
        if lien.state != LienState::Pending {
            return Err(LienError::InvalidState {
                operation: "activate",
                state: lien.state,
            });
        }
        if lien.is_expired_at(Utc::now()) {
            self.mark(&mut lien, LienState::Expired).await?;
            return Err(LienError::Expired(id));
        }
        self.mark(&mut lien, LienState::Active).await?;
        Ok(lien)
    }

    /// `Active -> Released`.
    #[instrument(skip(self), fields(lien_id = %id))]
    pub async fn release_lien(&self, id: LienId) -> Result<Lien, LienError> {
        let mut lien = self.get_lien(id).await?;
        if lien.state != LienState::Active {
            return Err(LienError::InvalidState {
                operation: "release",
                state: lien.state,
            });
        }
        self.mark(&mut lien, LienState::Released).await?;
        Ok(lien)
    }

    /// `Pending | Active -> Expired`.
    #[instrument(skip(self), fields(lien_id = %id))]
    pub async fn expire_lien(&self, id: LienId) -> Result<Lien, LienError> {
        let mut lien = self.get_lien(id).await?;
        if !lien.state.is_reserving() {
            return Err(LienError::InvalidState {
                operation: "expire",
                state: lien.state,
            });
        }
        self.mark(&mut lien, LienState::Expired).await?;
        Ok(lien)
    }

    /// Close every reserving lien an event still holds: active liens are
    /// released, pending ones expired. Used by compensation paths; failures
    /// on individual liens are logged and skipped.
    pub async fn release_open_liens(&self, event_id: EventId) -> Result<(), LienError> {
        for lien in self.store.list_by_event(event_id).await? {
            let result = match lien.state {
                LienState::Active => self.release_lien(lien.id).await,
                LienState::Pending => self.expire_lien(lien.id).await,
                _ => continue,
            };
            if let Err(e) = result {
                warn!(lien_id = %lien.id, error = %e, "failed to close lien during unwind");
            }
        }
        Ok(())
    }

    /// Expire every reserving lien whose expiry has passed. Returns how many
    /// liens were expired; individual failures are logged and skipped.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, LienError> {
        let mut expired = 0usize;
        for lien in self.store.list_expiring(now).await? {
            match self.expire_lien(lien.id).await {
                Ok(_) => expired += 1,
                Err(e) => warn!(lien_id = %lien.id, error = %e, "failed to expire overdue lien"),
            }
        }
        Ok(expired)
    }

    /// Availability as seen from inside `event_id`: raw balance minus the
    /// reservations held by *other* events. The calling event's own liens
    /// are spendable within it.
    pub async fn event_available_balance(
        &self,
        event_id: EventId,
        account_id: AccountId,
    ) -> Result<Decimal, LienError> {
        let available = self.balances.available_balance(account_id).await?;
        let reserved_by_others = self.reserved_amount(account_id, Some(event_id)).await?;
        Ok(available - reserved_by_others)
    }

    async fn reserved_amount(
        &self,
        account_id: AccountId,
        excluding_event: Option<EventId>,
    ) -> Result<Decimal, LienError> {
        let liens = self.store.list_by_account(account_id).await?;
        Ok(liens
            .iter()
            .filter(|l| l.state.is_reserving())
            .filter(|l| Some(l.event_id) != excluding_event)
            .map(|l| l.amount)
            .sum())
    }

    async fn mark(&self, lien: &mut Lien, state: LienState) -> Result<(), LienError> {
        lien.state = state;
        lien.updated_at = Utc::now();
        self.store.update_lien(lien).await?;
        info!(lien_id = %lien.id, state = %state, "lien transitioned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLienStore;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Balance source with a fixed per-account balance.
    struct FixedBalances(Mutex<HashMap<AccountId, Decimal>>);

    impl FixedBalances {
        fn with(account: AccountId, amount: Decimal) -> Arc<Self> {
            let mut map = HashMap::new();
            map.insert(account, amount);
            Arc::new(Self(Mutex::new(map)))
        }
    }

    #[async_trait]
    impl BalanceSource for FixedBalances {
        async fn available_balance(&self, account: AccountId) -> Result<Decimal, LienError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .get(&account)
                .copied()
                .unwrap_or(Decimal::ZERO))
        }
    }

    fn manager(account: AccountId, balance: Decimal) -> LienManager {
        LienManager::new(
            Arc::new(InMemoryLienStore::new()),
            FixedBalances::with(account, balance),
        )
    }

    fn tomorrow() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(24)
    }

    #[tokio::test]
    async fn reservations_stack_until_funds_run_out() {
        let account = AccountId::new();
        let mgr = manager(account, dec!(100));
        let event_a = EventId::new();
        let event_b = EventId::new();

        mgr.create_lien(event_a, account, dec!(60), "USD", tomorrow(), JsonValue::Null)
            .await
            .unwrap();

        let err = mgr
            .create_lien(event_b, account, dec!(60), "USD", tomorrow(), JsonValue::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, LienError::InsufficientFunds { .. }));

        // A smaller reservation still fits.
        mgr.create_lien(event_b, account, dec!(40), "USD", tomorrow(), JsonValue::Null)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_inputs_are_rejected() {
        let account = AccountId::new();
        let mgr = manager(account, dec!(100));
        let event = EventId::new();

        for (amount, currency, expires) in [
            (dec!(0), "USD", tomorrow()),
            (dec!(-1), "USD", tomorrow()),
            (dec!(1), "", tomorrow()),
            (dec!(1), "USD", Utc::now() - chrono::Duration::seconds(1)),
        ] {
            let err = mgr
                .create_lien(event, account, amount, currency, expires, JsonValue::Null)
                .await
                .unwrap_err();
            assert!(matches!(err, LienError::InvalidInput(_)), "{amount} {currency}");
        }
    }

    #[tokio::test]
    async fn lifecycle_follows_the_state_machine() {
        let account = AccountId::new();
        let mgr = manager(account, dec!(100));
        let event = EventId::new();

        let lien = mgr
            .create_lien(event, account, dec!(10), "USD", tomorrow(), JsonValue::Null)
            .await
            .unwrap();
        assert_eq!(lien.state, LienState::Pending);

        // Release before activation is illegal.
        let err = mgr.release_lien(lien.id).await.unwrap_err();
        assert!(matches!(err, LienError::InvalidState { .. }));

        let lien = mgr.activate_lien(lien.id).await.unwrap();
        assert_eq!(lien.state, LienState::Active);

        // Double activation is illegal.
        let err = mgr.activate_lien(lien.id).await.unwrap_err();
        assert!(matches!(err, LienError::InvalidState { .. }));

        let lien = mgr.release_lien(lien.id).await.unwrap();
        assert_eq!(lien.state, LienState::Released);

        // Terminal states stay terminal.
        let err = mgr.expire_lien(lien.id).await.unwrap_err();
        assert!(matches!(err, LienError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn activating_an_overdue_lien_expires_it() {
        let account = AccountId::new();
        let mgr = manager(account, dec!(100));
        let event = EventId::new();

        let lien = mgr
            .create_lien(
                event,
                account,
                dec!(10),
                "USD",
                Utc::now() + chrono::Duration::milliseconds(5),
                JsonValue::Null,
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let err = mgr.activate_lien(lien.id).await.unwrap_err();
        assert!(matches!(err, LienError::Expired(_)));
        assert_eq!(mgr.get_lien(lien.id).await.unwrap().state, LienState::Expired);

        // Expired liens no longer reserve funds.
        mgr.create_lien(EventId::new(), account, dec!(100), "USD", tomorrow(), JsonValue::Null)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn own_event_liens_do_not_reduce_event_availability() {
        let account = AccountId::new();
        let mgr = manager(account, dec!(100));
        let mine = EventId::new();
        let other = EventId::new();

        mgr.create_lien(mine, account, dec!(30), "USD", tomorrow(), JsonValue::Null)
            .await
            .unwrap();
        mgr.create_lien(other, account, dec!(20), "USD", tomorrow(), JsonValue::Null)
            .await
            .unwrap();

        assert_eq!(
            mgr.event_available_balance(mine, account).await.unwrap(),
            dec!(80)
        );
        assert_eq!(
            mgr.event_available_balance(other, account).await.unwrap(),
            dec!(70)
        );
    }

    #[tokio::test]
    async fn release_open_liens_closes_pending_and_active() {
        let account = AccountId::new();
        let mgr = manager(account, dec!(100));
        let event = EventId::new();

        let pending = mgr
            .create_lien(event, account, dec!(10), "USD", tomorrow(), JsonValue::Null)
            .await
            .unwrap();
        let active = mgr
            .create_lien(event, account, dec!(10), "USD", tomorrow(), JsonValue::Null)
            .await
            .unwrap();
        mgr.activate_lien(active.id).await.unwrap();

        mgr.release_open_liens(event).await.unwrap();

        assert_eq!(mgr.get_lien(pending.id).await.unwrap().state, LienState::Expired);
        assert_eq!(mgr.get_lien(active.id).await.unwrap().state, LienState::Released);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_oversubscribe() {
        let account = AccountId::new();
        let mgr = Arc::new(manager(account, dec!(100)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr.create_lien(
                    EventId::new(),
                    account,
                    dec!(80),
                    "USD",
                    Utc::now() + chrono::Duration::hours(1),
                    JsonValue::Null,
                )
                .await
            }));
        }

        let mut won = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                won += 1;
            }
        }
        assert_eq!(won, 1, "exactly one 80-of-100 reservation may win");
    }
}
