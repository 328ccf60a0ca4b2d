//! PostgreSQL entry store.
//!
//! An entry and all of its lines are inserted in one transaction, so balance
//! aggregation (which runs at Read Committed) sees either the full entry or
//! none of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use cascade_core::{AccountId, EntryId, EventId, LineId};
use cascade_ledger::{BalanceTotals, Entry, EntryLine, EntryPage, EntryStatus, EntryStore, StoreError};

use crate::db::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PgEntryStore {
    pool: PgPool,
}

impl PgEntryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_lines(&self, entry_ids: &[Uuid]) -> Result<Vec<EntryLine>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, entry_id, account_id, debit, credit, created_at
            FROM entry_lines
            WHERE entry_id = ANY($1)
            ORDER BY created_at, id
            "#,
        )
        .bind(entry_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_entry_lines", e))?;
        rows.iter().map(line_from_row).collect()
    }
}

fn line_from_row(row: &PgRow) -> Result<EntryLine, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("entry line row: {e}"));
    Ok(EntryLine {
        id: LineId::from_uuid(row.try_get("id").map_err(decode)?),
        entry_id: EntryId::from_uuid(row.try_get("entry_id").map_err(decode)?),
        account_id: AccountId::from_uuid(row.try_get("account_id").map_err(decode)?),
        debit: row.try_get("debit").map_err(decode)?,
        credit: row.try_get("credit").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<Entry, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("entry row: {e}"));
    let status: String = row.try_get("status").map_err(decode)?;
    let status: EntryStatus = status
        .parse()
        .map_err(|e| StoreError::Serialization(format!("entry status: {e}")))?;
    Ok(Entry {
        id: EntryId::from_uuid(row.try_get("id").map_err(decode)?),
        description: row.try_get("description").map_err(decode)?,
        date: row.try_get("date").map_err(decode)?,
        transaction_type: row.try_get("transaction_type").map_err(decode)?,
        reference_id: row.try_get("reference_id").map_err(decode)?,
        status,
        event_id: row
            .try_get::<Option<Uuid>, _>("event_id")
            .map_err(decode)?
            .map(EventId::from_uuid),
        lines: Vec::new(),
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

const ENTRY_COLUMNS: &str =
    "id, description, date, transaction_type, reference_id, status, event_id, created_at, updated_at";

#[async_trait]
impl EntryStore for PgEntryStore {
    #[instrument(skip(self, entry), fields(entry_id = %entry.id, lines = entry.lines.len()), err)]
    async fn insert(&self, entry: &Entry) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_entry_insert", e))?;

        sqlx::query(
            r#"
            INSERT INTO entries (id, description, date, transaction_type, reference_id, status, event_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.description)
        .bind(entry.date)
        .bind(&entry.transaction_type)
        .bind(&entry.reference_id)
        .bind(entry.status.as_str())
        .bind(entry.event_id.map(|e| *e.as_uuid()))
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_entry", e))?;

        for line in &entry.lines {
            sqlx::query(
                r#"
                INSERT INTO entry_lines (id, entry_id, account_id, debit, credit, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(line.entry_id.as_uuid())
            .bind(line.account_id.as_uuid())
            .bind(line.debit)
            .bind(line.credit)
            .bind(line.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_entry_line", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_entry_insert", e))?;
        Ok(())
    }

    async fn get(&self, id: EntryId) -> Result<Option<Entry>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_entry", e))?;

        let Some(row) = row else { return Ok(None) };
        let mut entry = entry_from_row(&row)?;
        entry.lines = self.load_lines(&[*entry.id.as_uuid()]).await?;
        Ok(Some(entry))
    }

    async fn list_by_date(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: u32,
        page_size: u32,
    ) -> Result<EntryPage, StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM entries WHERE date BETWEEN $1 AND $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_entries", e))?;

        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM entries
            WHERE date BETWEEN $1 AND $2
            ORDER BY date DESC
            OFFSET $3 LIMIT $4
            "#
        ))
        .bind(start)
        .bind(end)
        .bind(offset)
        .bind(page_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_entries", e))?;

        let mut entries: Vec<Entry> = rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<_, _>>()?;

        if !entries.is_empty() {
            let ids: Vec<Uuid> = entries.iter().map(|e| *e.id.as_uuid()).collect();
            let lines = self.load_lines(&ids).await?;
            for line in lines {
                if let Some(entry) = entries.iter_mut().find(|e| e.id == line.entry_id) {
                    entry.lines.push(line);
                }
            }
        }

        Ok(EntryPage {
            entries,
            total: total as u64,
            page,
            page_size,
        })
    }

    async fn balance_totals(&self, account: AccountId) -> Result<BalanceTotals, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(l.debit), 0) AS debits,
                COALESCE(SUM(l.credit), 0) AS credits
            FROM entry_lines l
            JOIN entries e ON e.id = l.entry_id
            WHERE l.account_id = $1 AND e.status = 'posted'
            "#,
        )
        .bind(account.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("balance_totals", e))?;

        let decode = |e: sqlx::Error| StoreError::Serialization(format!("balance row: {e}"));
        Ok(BalanceTotals {
            debits: row.try_get::<Decimal, _>("debits").map_err(decode)?,
            credits: row.try_get::<Decimal, _>("credits").map_err(decode)?,
        })
    }
}
