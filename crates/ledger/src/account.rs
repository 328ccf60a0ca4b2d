use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cascade_core::{AccountId, DomainError, UserId};

/// High-level account kind (classification; determines the normal balance
/// side for reporting purposes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
    /// Internal platform accounts (clearing, FX holding, fee revenue).
    System,
}

impl AccountKind {
    /// Whether the classification's natural balance is on the debit side.
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountKind::Asset | AccountKind::Expense)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Asset => "asset",
            AccountKind::Liability => "liability",
            AccountKind::Equity => "equity",
            AccountKind::Revenue => "revenue",
            AccountKind::Expense => "expense",
            AccountKind::System => "system",
        }
    }
}

impl std::str::FromStr for AccountKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asset" => Ok(AccountKind::Asset),
            "liability" => Ok(AccountKind::Liability),
            "equity" => Ok(AccountKind::Equity),
            "revenue" => Ok(AccountKind::Revenue),
            "expense" => Ok(AccountKind::Expense),
            "system" => Ok(AccountKind::System),
            other => Err(DomainError::validation(format!(
                "unknown account kind '{other}'"
            ))),
        }
    }
}

/// A pool of value in one currency.
///
/// Balance is never stored here; it is derived from posted entry lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    /// Absent for system-owned accounts.
    pub owner_id: Option<UserId>,
    /// ISO 4217 style three-letter code.
    pub currency: String,
    /// Soft-delete marker; deleted accounts stay readable for history but
    /// reject new postings.
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        id: AccountId,
        name: impl Into<String>,
        kind: AccountKind,
        owner_id: Option<UserId>,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            kind,
            owner_id,
            currency: currency.into(),
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Field-level validation applied before persistence.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("account name must not be empty"));
        }
        validate_currency(&self.currency)?;
        Ok(())
    }
}

/// Currency codes are three ASCII uppercase letters.
pub fn validate_currency(currency: &str) -> Result<(), DomainError> {
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(DomainError::validation(format!(
            "invalid currency code '{currency}'"
        )));
    }
    Ok(())
}
