//! PostgreSQL account store.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use cascade_core::{AccountId, UserId};
use cascade_ledger::{Account, AccountKind, AccountStore, StoreError};

use crate::db::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(format!("account row: {e}"));
    let kind: String = row.try_get("type").map_err(decode)?;
    let kind: AccountKind = kind
        .parse()
        .map_err(|e| StoreError::Serialization(format!("account kind: {e}")))?;
    Ok(Account {
        id: AccountId::from_uuid(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        kind,
        owner_id: row
            .try_get::<Option<Uuid>, _>("user_id")
            .map_err(decode)?
            .map(UserId::from_uuid),
        currency: row.try_get("currency").map_err(decode)?,
        deleted: row.try_get("deleted").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, name, type, user_id, currency, deleted, created_at, updated_at";

#[async_trait]
impl AccountStore for PgAccountStore {
    #[instrument(skip(self, account), fields(account_id = %account.id), err)]
    async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, name, type, user_id, currency, deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(&account.name)
        .bind(account.kind.as_str())
        .bind(account.owner_id.map(|u| *u.as_uuid()))
        .bind(&account.currency)
        .bind(account.deleted)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;
        Ok(())
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_account", e))?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn list_by_owner(&self, owner: UserId) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_accounts_by_owner", e))?;
        rows.iter().map(account_from_row).collect()
    }

    #[instrument(skip(self, account), fields(account_id = %account.id), err)]
    async fn update(&self, account: &Account) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = $2, deleted = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(&account.name)
        .bind(account.deleted)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_account", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {}", account.id)));
        }
        Ok(())
    }
}
