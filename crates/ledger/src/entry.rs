use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cascade_core::{AccountId, DomainError, EntryId, EventId, LineId};

/// Ledger entries carry amounts at up to four decimal places.
pub const AMOUNT_SCALE: u32 = 4;

/// Lifecycle status of an entry. Entries are append-only once posted;
/// corrections are new, offsetting entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Posted,
    Pending,
    Voided,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Posted => "posted",
            EntryStatus::Pending => "pending",
            EntryStatus::Voided => "voided",
        }
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posted" => Ok(EntryStatus::Posted),
            "pending" => Ok(EntryStatus::Pending),
            "voided" => Ok(EntryStatus::Voided),
            other => Err(DomainError::validation(format!(
                "unknown entry status '{other}'"
            ))),
        }
    }
}

/// One debit or credit against a single account.
///
/// Exactly one of `debit`/`credit` is non-zero; both are non-negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLine {
    pub id: LineId,
    pub entry_id: EntryId,
    pub account_id: AccountId,
    pub debit: Decimal,
    pub credit: Decimal,
    pub created_at: DateTime<Utc>,
}

impl EntryLine {
    pub fn debit(account_id: AccountId, amount: Decimal) -> Self {
        Self::raw(account_id, amount, Decimal::ZERO)
    }

    pub fn credit(account_id: AccountId, amount: Decimal) -> Self {
        Self::raw(account_id, Decimal::ZERO, amount)
    }

    fn raw(account_id: AccountId, debit: Decimal, credit: Decimal) -> Self {
        Self {
            id: LineId::new(),
            entry_id: EntryId::from_uuid(uuid::Uuid::nil()),
            account_id,
            debit,
            credit,
            created_at: Utc::now(),
        }
    }

    /// The opposite-side line, used when building reversal entries.
    pub fn inverted(&self) -> Self {
        Self {
            id: LineId::new(),
            entry_id: self.entry_id,
            account_id: self.account_id,
            debit: self.credit,
            credit: self.debit,
            created_at: Utc::now(),
        }
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.debit < Decimal::ZERO || self.credit < Decimal::ZERO {
            return Err(DomainError::validation(
                "debit and credit amounts must be non-negative",
            ));
        }
        let debit_set = !self.debit.is_zero();
        let credit_set = !self.credit.is_zero();
        if debit_set == credit_set {
            return Err(DomainError::validation(
                "exactly one of debit/credit must be non-zero",
            ));
        }
        if self.debit.scale() > AMOUNT_SCALE || self.credit.scale() > AMOUNT_SCALE {
            return Err(DomainError::validation(format!(
                "amounts use at most {AMOUNT_SCALE} decimal places"
            )));
        }
        Ok(())
    }
}

/// One atomic, balanced double-entry posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub description: String,
    /// Business date of the movement (not the persistence timestamp).
    pub date: DateTime<Utc>,
    pub transaction_type: String,
    /// External reference or parent-event correlation.
    pub reference_id: Option<String>,
    pub status: EntryStatus,
    /// Set when the entry was produced by a chained transaction event.
    pub event_id: Option<EventId>,
    pub lines: Vec<EntryLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// Build a posted entry, stamping line ownership and timestamps.
    pub fn new(
        id: EntryId,
        description: impl Into<String>,
        transaction_type: impl Into<String>,
        reference_id: Option<String>,
        event_id: Option<EventId>,
        mut lines: Vec<EntryLine>,
    ) -> Self {
        let now = Utc::now();
        for line in &mut lines {
            line.entry_id = id;
            line.created_at = now;
        }
        Self {
            id,
            description: description.into(),
            date: now,
            transaction_type: transaction_type.into(),
            reference_id,
            status: EntryStatus::Posted,
            event_id,
            lines,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sum of all debit amounts.
    pub fn total_debits(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    /// Sum of all credit amounts.
    pub fn total_credits(&self) -> Decimal {
        self.lines.iter().map(|l| l.credit).sum()
    }

    /// Enforce the double-entry shape: at least two lines, every line valid,
    /// and debits exactly equal to credits.
    ///
    /// Account existence is checked by the service, which has store access.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.lines.len() < 2 {
            return Err(DomainError::validation(
                "entry must have at least two lines",
            ));
        }
        for line in &self.lines {
            line.validate()?;
        }
        let debits = self.total_debits();
        let credits = self.total_credits();
        if debits != credits {
            return Err(DomainError::invariant(format!(
                "debits ({debits}) do not equal credits ({credits})"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn entry_with(lines: Vec<EntryLine>) -> Entry {
        Entry::new(EntryId::new(), "test", "transfer", None, None, lines)
    }

    #[test]
    fn balanced_entry_is_valid() {
        let a = AccountId::new();
        let b = AccountId::new();
        let entry = entry_with(vec![
            EntryLine::debit(a, dec!(100)),
            EntryLine::credit(b, dec!(100)),
        ]);
        entry.validate().unwrap();
        assert_eq!(entry.lines[0].entry_id, entry.id);
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let entry = entry_with(vec![
            EntryLine::debit(AccountId::new(), dec!(100)),
            EntryLine::credit(AccountId::new(), dec!(99.9999)),
        ]);
        assert!(matches!(
            entry.validate(),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn single_line_is_rejected() {
        let entry = entry_with(vec![EntryLine::debit(AccountId::new(), dec!(1))]);
        assert!(matches!(entry.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn line_with_both_sides_is_rejected() {
        let mut line = EntryLine::debit(AccountId::new(), dec!(5));
        line.credit = dec!(5);
        let entry = entry_with(vec![line, EntryLine::credit(AccountId::new(), dec!(5))]);
        assert!(matches!(entry.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn line_with_neither_side_is_rejected() {
        let line = EntryLine::debit(AccountId::new(), dec!(0));
        let entry = entry_with(vec![line, EntryLine::credit(AccountId::new(), dec!(0))]);
        assert!(matches!(entry.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn excess_scale_is_rejected() {
        let entry = entry_with(vec![
            EntryLine::debit(AccountId::new(), dec!(1.00001)),
            EntryLine::credit(AccountId::new(), dec!(1.00001)),
        ]);
        assert!(matches!(entry.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn inverted_line_swaps_sides() {
        let line = EntryLine::debit(AccountId::new(), dec!(42.5));
        let inv = line.inverted();
        assert_eq!(inv.credit, dec!(42.5));
        assert!(inv.debit.is_zero());
        assert_eq!(inv.account_id, line.account_id);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any entry built from pairwise-mirrored lines passes
        /// validation and nets to zero.
        #[test]
        fn mirrored_lines_always_balance(
            cents in prop::collection::vec(1i64..1_000_000i64, 1..10)
        ) {
            let mut lines = Vec::new();
            for c in &cents {
                let amount = Decimal::new(*c, 2);
                lines.push(EntryLine::debit(AccountId::new(), amount));
                lines.push(EntryLine::credit(AccountId::new(), amount));
            }
            let entry = entry_with(lines);
            prop_assert!(entry.validate().is_ok());
            prop_assert_eq!(entry.total_debits() - entry.total_credits(), Decimal::ZERO);
        }
    }
}
