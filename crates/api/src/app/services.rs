//! Service wiring: stores, ledger service, lien manager, coordinator,
//! executor registration, and system account provisioning.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use cascade_core::{AccountId, DomainError};
use cascade_engine::{
    register_builtin_executors, BalanceSource, Coordinator, EventStore, ExecutorRegistry,
    InMemoryEventStore, InMemoryLienStore, LienManager, LienStore, Sweeper, SweeperHandle,
    SystemAccounts,
};
use cascade_infra::{connect, run_migrations, PgAccountStore, PgEntryStore, PgEventStore, PgLienStore};
use cascade_ledger::memory::{InMemoryAccountStore, InMemoryEntryStore};
use cascade_ledger::{
    Account, AccountKind, AccountStore, EntryStore, LedgerError, LedgerService, StoreError,
};

/// Currencies that get an FX holding account provisioned at startup.
const FX_CURRENCIES: [&str; 3] = ["USD", "EUR", "GBP"];

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Everything the handlers need, shared via `Extension<Arc<AppServices>>`.
pub struct AppServices {
    pub ledger: Arc<LedgerService>,
    pub liens: Arc<LienManager>,
    pub coordinator: Arc<Coordinator>,
    pub events: Arc<dyn EventStore>,
}

impl AppServices {
    /// Production wiring: PostgreSQL stores behind `DATABASE_URL`.
    pub async fn postgres(database_url: &str) -> Result<Arc<Self>, InitError> {
        let pool = connect(database_url).await?;
        run_migrations(&pool).await?;

        let accounts: Arc<dyn AccountStore> = Arc::new(PgAccountStore::new(pool.clone()));
        let entries: Arc<dyn EntryStore> = Arc::new(PgEntryStore::new(pool.clone()));
        let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(pool.clone()));
        let liens: Arc<dyn LienStore> = Arc::new(PgLienStore::new(pool));

        Self::assemble(accounts, entries, events, liens).await
    }

    /// In-memory wiring for tests and dev embedding.
    pub async fn in_memory() -> Result<Arc<Self>, InitError> {
        Self::assemble(
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryEntryStore::new()),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryLienStore::new()),
        )
        .await
    }

    async fn assemble(
        accounts: Arc<dyn AccountStore>,
        entries: Arc<dyn EntryStore>,
        events: Arc<dyn EventStore>,
        lien_store: Arc<dyn LienStore>,
    ) -> Result<Arc<Self>, InitError> {
        let ledger = Arc::new(LedgerService::new(accounts, entries));
        let liens = Arc::new(LienManager::new(
            lien_store,
            ledger.clone() as Arc<dyn BalanceSource>,
        ));

        let system = Arc::new(provision_system_accounts(&ledger).await?);
        let registry = Arc::new(ExecutorRegistry::new());
        register_builtin_executors(&registry, ledger.clone(), liens.clone(), system);

        let coordinator = Arc::new(Coordinator::new(events.clone(), registry));

        Ok(Arc::new(Self {
            ledger,
            liens,
            coordinator,
            events,
        }))
    }

    /// Start the lien/event expiry sweeper.
    pub fn start_sweeper(&self) -> SweeperHandle {
        Sweeper::new(
            self.events.clone(),
            self.liens.clone(),
            self.coordinator.clone(),
        )
        .spawn()
    }
}

/// Create the platform accounts the executors post against.
///
/// Ids are derived from the account's role name, so provisioning is
/// idempotent across restarts: an already-existing account is left alone.
async fn provision_system_accounts(
    ledger: &Arc<LedgerService>,
) -> Result<SystemAccounts, InitError> {
    let deposit_clearing = ensure_system_account(ledger, "system.deposit-clearing", "USD").await?;
    let withdrawal_clearing =
        ensure_system_account(ledger, "system.withdrawal-clearing", "USD").await?;
    let fee_revenue = ensure_system_account(ledger, "system.fee-revenue", "USD").await?;

    let mut system = SystemAccounts::new(deposit_clearing, withdrawal_clearing, fee_revenue);
    for currency in FX_CURRENCIES {
        let name = format!("system.fx-holding.{}", currency.to_ascii_lowercase());
        let id = ensure_system_account(ledger, &name, currency).await?;
        system = system.with_fx_holding(currency, id);
    }
    Ok(system)
}

async fn ensure_system_account(
    ledger: &Arc<LedgerService>,
    name: &str,
    currency: &str,
) -> Result<AccountId, InitError> {
    let id = AccountId::derived(&Uuid::NAMESPACE_OID, name);
    let account = Account::new(id, name, AccountKind::System, None, currency);
    match ledger.create_account(account).await {
        Ok(_) => {
            info!(account_id = %id, name, "system account provisioned");
            Ok(id)
        }
        Err(LedgerError::Domain(DomainError::Conflict(_))) => Ok(id),
        Err(e) => Err(e.into()),
    }
}
