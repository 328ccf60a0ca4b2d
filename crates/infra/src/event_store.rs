//! PostgreSQL event store (events + transactions).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use cascade_core::{EventId, TransactionId};
use cascade_engine::{Event, EventState, EventStore, Transaction, TransactionState};
use cascade_ledger::StoreError;

use crate::db::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn interval_from_duration(d: Duration) -> PgInterval {
    PgInterval {
        months: 0,
        days: 0,
        microseconds: d.as_micros().min(i64::MAX as u128) as i64,
    }
}

fn duration_from_interval(i: &PgInterval) -> Duration {
    let micros = i.microseconds
        + (i.days as i64) * 86_400_000_000
        + (i.months as i64) * 30 * 86_400_000_000;
    Duration::from_micros(micros.max(0) as u64)
}

fn event_from_row(row: &PgRow) -> Result<Event, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("event row: {e}"));
    let state: String = row.try_get("state").map_err(decode)?;
    let state: EventState = state
        .parse()
        .map_err(|e| StoreError::Serialization(format!("event state: {e}")))?;
    Ok(Event {
        id: EventId::from_uuid(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        state,
        timeout: row
            .try_get::<Option<PgInterval>, _>("timeout")
            .map_err(decode)?
            .as_ref()
            .map(duration_from_interval),
        metadata: row.try_get("metadata").map_err(decode)?,
        error: row.try_get("error").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        completed_at: row.try_get("completed_at").map_err(decode)?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("transaction row: {e}"));
    let state: String = row.try_get("state").map_err(decode)?;
    let state: TransactionState = state
        .parse()
        .map_err(|e| StoreError::Serialization(format!("transaction state: {e}")))?;
    let dependencies: JsonValue = row.try_get("dependencies").map_err(decode)?;
    let dependencies: Vec<TransactionId> = serde_json::from_value(dependencies)
        .map_err(|e| StoreError::Serialization(format!("transaction dependencies: {e}")))?;
    Ok(Transaction {
        id: TransactionId::from_uuid(row.try_get("id").map_err(decode)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        kind: row.try_get("type").map_err(decode)?,
        state,
        order: row.try_get("order").map_err(decode)?,
        dependencies,
        payload: row.try_get("payload").map_err(decode)?,
        result: row.try_get("result").map_err(decode)?,
        error: row.try_get("error").map_err(decode)?,
        started_at: row.try_get("started_at").map_err(decode)?,
        completed_at: row.try_get("completed_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn dependencies_json(tx: &Transaction) -> Result<JsonValue, StoreError> {
    serde_json::to_value(&tx.dependencies)
        .map_err(|e| StoreError::Serialization(format!("transaction dependencies: {e}")))
}

const EVENT_COLUMNS: &str =
    "id, name, description, state, timeout, metadata, error, created_at, updated_at, completed_at";
const TX_COLUMNS: &str = r#"id, event_id, name, type, state, "order", dependencies, payload, result, error, started_at, completed_at, created_at, updated_at"#;

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, event), fields(event_id = %event.id), err)]
    async fn save_event(&self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cte_events (id, name, description, state, timeout, metadata, error, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.state.as_str())
        .bind(event.timeout.map(interval_from_duration))
        .bind(&event.metadata)
        .bind(&event.error)
        .bind(event.created_at)
        .bind(event.updated_at)
        .bind(event.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_event", e))?;
        Ok(())
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM cte_events WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_event", e))?;
        row.as_ref().map(event_from_row).transpose()
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, state = %event.state), err)]
    async fn update_event(&self, event: &Event) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cte_events
            SET state = $2, error = $3, metadata = $4, updated_at = $5, completed_at = $6
            WHERE id = $1
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.state.as_str())
        .bind(&event.error)
        .bind(&event.metadata)
        .bind(event.updated_at)
        .bind(event.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_event", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("event {}", event.id)));
        }
        Ok(())
    }

    async fn list_events_by_state(&self, state: EventState) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM cte_events WHERE state = $1 ORDER BY created_at"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_events_by_state", e))?;
        rows.iter().map(event_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete_event(&self, id: EventId) -> Result<(), StoreError> {
        // Transactions and liens cascade via foreign keys.
        let result = sqlx::query("DELETE FROM cte_events WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_event", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("event {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, tx), fields(transaction_id = %tx.id), err)]
    async fn save_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cte_transactions (id, event_id, name, type, state, "order", dependencies, payload, result, error, started_at, completed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(tx.id.as_uuid())
        .bind(tx.event_id.as_uuid())
        .bind(&tx.name)
        .bind(&tx.kind)
        .bind(tx.state.as_str())
        .bind(tx.order)
        .bind(dependencies_json(tx)?)
        .bind(&tx.payload)
        .bind(&tx.result)
        .bind(&tx.error)
        .bind(tx.started_at)
        .bind(tx.completed_at)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_transaction", e))?;
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM cte_transactions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transaction", e))?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    #[instrument(skip(self, tx), fields(transaction_id = %tx.id, state = %tx.state), err)]
    async fn update_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cte_transactions
            SET state = $2, result = $3, error = $4, started_at = $5, completed_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(tx.id.as_uuid())
        .bind(tx.state.as_str())
        .bind(&tx.result)
        .bind(&tx.error)
        .bind(tx.started_at)
        .bind(tx.completed_at)
        .bind(tx.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_transaction", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("transaction {}", tx.id)));
        }
        Ok(())
    }

    async fn list_event_transactions(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {TX_COLUMNS} FROM cte_transactions WHERE event_id = $1 ORDER BY "order", created_at"#
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_event_transactions", e))?;
        rows.iter().map(transaction_from_row).collect()
    }
}
