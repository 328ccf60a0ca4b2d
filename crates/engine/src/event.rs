//! Chained transaction events and their per-step transactions.
//!
//! Both carry explicit state machines; every transition is persisted before
//! the engine acts on it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use cascade_core::{DomainError, EventId, TransactionId};

/// Lifecycle state of a chained transaction event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    Created,
    Validating,
    Validated,
    Executing,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
}

impl EventState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventState::Completed | EventState::RolledBack)
    }

    /// Whether the event machine permits `self -> to`.
    pub fn can_transition_to(&self, to: EventState) -> bool {
        use EventState::*;
        matches!(
            (self, to),
            (Created, Validating)
                | (Validating, Validated)
                | (Validating, Failed)
                | (Validated, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Completed, RollingBack)
                | (Failed, RollingBack)
                | (RollingBack, RolledBack)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Created => "CREATED",
            EventState::Validating => "VALIDATING",
            EventState::Validated => "VALIDATED",
            EventState::Executing => "EXECUTING",
            EventState::Completed => "COMPLETED",
            EventState::Failed => "FAILED",
            EventState::RollingBack => "ROLLING_BACK",
            EventState::RolledBack => "ROLLED_BACK",
        }
    }
}

impl std::str::FromStr for EventState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(EventState::Created),
            "VALIDATING" => Ok(EventState::Validating),
            "VALIDATED" => Ok(EventState::Validated),
            "EXECUTING" => Ok(EventState::Executing),
            "COMPLETED" => Ok(EventState::Completed),
            "FAILED" => Ok(EventState::Failed),
            "ROLLING_BACK" => Ok(EventState::RollingBack),
            "ROLLED_BACK" => Ok(EventState::RolledBack),
            other => Err(DomainError::validation(format!(
                "unknown event state '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one transaction step within an event.
///
/// `Skipped` is reserved for conditional steps whose precondition evaluates
/// false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Pending,
    Executing,
    Completed,
    Failed,
    Compensating,
    Compensated,
    Skipped,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Completed
                | TransactionState::Failed
                | TransactionState::Compensated
                | TransactionState::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "PENDING",
            TransactionState::Executing => "EXECUTING",
            TransactionState::Completed => "COMPLETED",
            TransactionState::Failed => "FAILED",
            TransactionState::Compensating => "COMPENSATING",
            TransactionState::Compensated => "COMPENSATED",
            TransactionState::Skipped => "SKIPPED",
        }
    }
}

impl std::str::FromStr for TransactionState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionState::Pending),
            "EXECUTING" => Ok(TransactionState::Executing),
            "COMPLETED" => Ok(TransactionState::Completed),
            "FAILED" => Ok(TransactionState::Failed),
            "COMPENSATING" => Ok(TransactionState::Compensating),
            "COMPENSATED" => Ok(TransactionState::Compensated),
            "SKIPPED" => Ok(TransactionState::Skipped),
            other => Err(DomainError::validation(format!(
                "unknown transaction state '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chained transaction event: a named unit of orchestrated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub description: Option<String>,
    pub state: EventState,
    /// After this long in `EXECUTING` the sweeper forces compensation.
    pub timeout: Option<Duration>,
    pub metadata: JsonValue,
    /// Overall failure cause, when the event failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        timeout: Option<Duration>,
        metadata: JsonValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: EventId::new(),
            name: name.into(),
            description,
            state: EventState::Created,
            timeout,
            metadata,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// The instant the event is considered overdue, if a timeout was set.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let timeout = self.timeout?;
        let timeout = chrono::Duration::from_std(timeout).ok()?;
        Some(self.created_at + timeout)
    }
}

/// One orchestrated step within an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub event_id: EventId,
    pub name: String,
    /// Type tag resolved through the executor registry, e.g.
    /// `wallet.transfer`.
    #[serde(rename = "type")]
    pub kind: String,
    pub state: TransactionState,
    /// Execution order within the event (ascending).
    pub order: i32,
    /// Sibling transactions that must complete first.
    pub dependencies: Vec<TransactionId>,
    pub payload: JsonValue,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        event_id: EventId,
        name: impl Into<String>,
        kind: impl Into<String>,
        order: i32,
        dependencies: Vec<TransactionId>,
        payload: JsonValue,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            event_id,
            name: name.into(),
            kind: kind.into(),
            state: TransactionState::Pending,
            order,
            dependencies,
            payload,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: TransactionId) -> Self {
        self.id = id;
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
