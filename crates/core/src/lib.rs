//! Core domain primitives shared by every crate: strongly-typed identifiers
//! and the domain error model.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, EntryId, EventId, LienId, LineId, TransactionId, UserId};
