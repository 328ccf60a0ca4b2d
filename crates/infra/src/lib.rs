//! PostgreSQL realizations of the workspace's store traits.
//!
//! All queries are runtime-checked sqlx. Error mapping is uniform: unique
//! violations become [`StoreError::Conflict`], everything else a database
//! fault; see [`db::map_sqlx_error`].

pub mod account_store;
pub mod db;
pub mod entry_store;
pub mod event_store;
pub mod lien_store;

pub use account_store::PgAccountStore;
pub use db::{connect, run_migrations};
pub use entry_store::PgEntryStore;
pub use event_store::PgEventStore;
pub use lien_store::PgLienStore;
