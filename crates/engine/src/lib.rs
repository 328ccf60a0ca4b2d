//! Chained transaction event engine.
//!
//! A CTE is a named sequence of transaction steps that completes atomically
//! as a unit or is compensated in reverse order. The pieces:
//!
//! - [`coordinator::Coordinator`]: event lifecycle, dependency-ordered
//!   execution with retry, reverse-order compensation
//! - [`registry::ExecutorRegistry`]: type tag -> execute/compensate pair
//! - [`lien_manager::LienManager`]: per-event fund reservations (CTEL)
//! - [`executors`]: the built-in wallet and batch executors
//! - [`sweeper::Sweeper`]: background expiry of overdue liens and events

pub mod coordinator;
pub mod error;
pub mod event;
pub mod executors;
pub mod lien;
pub mod lien_manager;
pub mod memory;
pub mod registry;
pub mod store;
pub mod sweeper;

pub use coordinator::{Coordinator, EngineConfig, TransactionSpec};
pub use error::{EngineError, ExecutorError};
pub use event::{Event, EventState, Transaction, TransactionState};
pub use executors::{register_builtin_executors, SystemAccounts};
pub use lien::{Lien, LienError, LienState};
pub use lien_manager::{BalanceSource, LienManager};
pub use memory::{InMemoryEventStore, InMemoryLienStore};
pub use registry::{ExecutorRegistry, TransactionExecutor};
pub use store::{EventStore, LienStore};
pub use sweeper::{Sweeper, SweeperHandle};
