//! Chained transaction event liens: fund reservations scoped to one event.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use cascade_core::{AccountId, DomainError, EventId, LienId};
use cascade_ledger::StoreError;

/// Lien lifecycle. `Released` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LienState {
    Pending,
    Active,
    Released,
    Expired,
}

impl LienState {
    /// Pending and active liens reserve funds.
    pub fn is_reserving(&self) -> bool {
        matches!(self, LienState::Pending | LienState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LienState::Pending => "PENDING",
            LienState::Active => "ACTIVE",
            LienState::Released => "RELEASED",
            LienState::Expired => "EXPIRED",
        }
    }
}

impl std::str::FromStr for LienState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(LienState::Pending),
            "ACTIVE" => Ok(LienState::Active),
            "RELEASED" => Ok(LienState::Released),
            "EXPIRED" => Ok(LienState::Expired),
            other => Err(DomainError::validation(format!(
                "unknown lien state '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for LienState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation of account funds owned by one event.
///
/// Reserving liens subtract from every other event's availability; the
/// owning event may still spend the reserved amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lien {
    pub id: LienId,
    pub event_id: EventId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub currency: String,
    pub state: LienState,
    pub expires_at: DateTime<Utc>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lien {
    pub fn new(
        event_id: EventId,
        account_id: AccountId,
        amount: Decimal,
        currency: impl Into<String>,
        expires_at: DateTime<Utc>,
        metadata: JsonValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: LienId::new(),
            event_id,
            account_id,
            amount,
            currency: currency.into(),
            state: LienState::Pending,
            expires_at,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Failures of the lien manager.
#[derive(Debug, Error)]
pub enum LienError {
    #[error("lien {0} not found")]
    NotFound(LienId),

    #[error("insufficient funds: available={available}, reserved={reserved}, requested={requested}")]
    InsufficientFunds {
        available: Decimal,
        reserved: Decimal,
        requested: Decimal,
    },

    #[error("cannot {operation} lien in state {state}")]
    InvalidState {
        operation: &'static str,
        state: LienState,
    },

    #[error("lien {0} has expired")]
    Expired(LienId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The availability lookup behind the sufficiency check failed.
    #[error("balance lookup failed: {0}")]
    Balance(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
