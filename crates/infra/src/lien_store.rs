//! PostgreSQL lien store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use cascade_core::{AccountId, EventId, LienId};
use cascade_engine::{Lien, LienState, LienStore};
use cascade_ledger::StoreError;

use crate::db::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PgLienStore {
    pool: PgPool,
}

impl PgLienStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn lien_from_row(row: &PgRow) -> Result<Lien, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("lien row: {e}"));
    let state: String = row.try_get("state").map_err(decode)?;
    let state: LienState = state
        .parse()
        .map_err(|e| StoreError::Serialization(format!("lien state: {e}")))?;
    Ok(Lien {
        id: LienId::from_uuid(row.try_get("id").map_err(decode)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(decode)?),
        account_id: AccountId::from_uuid(row.try_get("account_id").map_err(decode)?),
        amount: row.try_get("amount").map_err(decode)?,
        currency: row.try_get("currency").map_err(decode)?,
        state,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        metadata: row.try_get("metadata").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

const LIEN_COLUMNS: &str =
    "id, event_id, account_id, amount, currency, state, expires_at, metadata, created_at, updated_at";

#[async_trait]
impl LienStore for PgLienStore {
    #[instrument(skip(self, lien), fields(lien_id = %lien.id), err)]
    async fn save_lien(&self, lien: &Lien) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cte_liens (id, event_id, account_id, amount, currency, state, expires_at, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(lien.id.as_uuid())
        .bind(lien.event_id.as_uuid())
        .bind(lien.account_id.as_uuid())
        .bind(lien.amount)
        .bind(&lien.currency)
        .bind(lien.state.as_str())
        .bind(lien.expires_at)
        .bind(&lien.metadata)
        .bind(lien.created_at)
        .bind(lien.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_lien", e))?;
        Ok(())
    }

    async fn get_lien(&self, id: LienId) -> Result<Option<Lien>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {LIEN_COLUMNS} FROM cte_liens WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_lien", e))?;
        row.as_ref().map(lien_from_row).transpose()
    }

    #[instrument(skip(self, lien), fields(lien_id = %lien.id, state = %lien.state), err)]
    async fn update_lien(&self, lien: &Lien) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cte_liens
            SET state = $2, expires_at = $3, metadata = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(lien.id.as_uuid())
        .bind(lien.state.as_str())
        .bind(lien.expires_at)
        .bind(&lien.metadata)
        .bind(lien.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_lien", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("lien {}", lien.id)));
        }
        Ok(())
    }

    async fn list_by_event(&self, event_id: EventId) -> Result<Vec<Lien>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LIEN_COLUMNS} FROM cte_liens WHERE event_id = $1 ORDER BY created_at"
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_liens_by_event", e))?;
        rows.iter().map(lien_from_row).collect()
    }

    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Lien>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LIEN_COLUMNS} FROM cte_liens WHERE account_id = $1 ORDER BY created_at"
        ))
        .bind(account_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_liens_by_account", e))?;
        rows.iter().map(lien_from_row).collect()
    }

    async fn list_expiring(&self, now: DateTime<Utc>) -> Result<Vec<Lien>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LIEN_COLUMNS} FROM cte_liens
            WHERE state IN ('PENDING', 'ACTIVE') AND expires_at <= $1
            ORDER BY expires_at
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_expiring_liens", e))?;
        rows.iter().map(lien_from_row).collect()
    }
}
