//! Domain error model.
//!
//! Domain errors represent business-logic failures (validation, invariant
//! violations, conflicts). Infrastructure failures (database, network) live
//! in the store layers and are wrapped, not folded into this enum.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error (deterministic business failures).
///
/// Errors are `Clone` and `PartialEq` so they can be compared in tests and
/// carried across task boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (malformed input, bad field).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated (e.g. debits != credits).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A conflict occurred (duplicate identifier, disallowed transition).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An account lacks the funds an operation requires.
    #[error("insufficient funds: available={available}, reserved={reserved}, requested={requested}")]
    InsufficientFunds {
        available: Decimal,
        reserved: Decimal,
        requested: Decimal,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
