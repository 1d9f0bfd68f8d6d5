//! # Account Repository
//!
//! Connected CRM portals and their OAuth tokens.
//!
//! The worker reads every enabled account at startup and writes tokens back
//! after the passes finish, so a refresh made during one run is reused by the
//! next.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use pulse_core::{from_millis, to_millis};

/// A connected CRM portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Portal (hub) id.
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// When `access_token` stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// Disabled accounts are skipped by the worker.
    pub enabled: bool,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    account_id: String,
    access_token: String,
    refresh_token: String,
    expires_at: i64,
    enabled: bool,
}

impl TryFrom<AccountRow> for Account {
    type Error = DbError;

    fn try_from(row: AccountRow) -> DbResult<Self> {
        Ok(Account {
            account_id: row.account_id,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            expires_at: from_millis(row.expires_at)?,
            enabled: row.enabled,
        })
    }
}

/// Repository for account operations.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    /// Creates a new AccountRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AccountRepository { pool }
    }

    /// Inserts an account or replaces its tokens and enabled flag.
    pub async fn upsert(&self, account: &Account) -> DbResult<()> {
        let now = to_millis(Utc::now());

        debug!(account_id = %account.account_id, "Upserting account");

        sqlx::query(
            r#"
            INSERT INTO accounts (
                account_id, access_token, refresh_token, expires_at,
                enabled, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT (account_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&account.account_id)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(to_millis(account.expires_at))
        .bind(account.enabled)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets an account by id.
    pub async fn get(&self, account_id: &str) -> DbResult<Account> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT account_id, access_token, refresh_token, expires_at, enabled
            FROM accounts
            WHERE account_id = ?1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| DbError::not_found("Account", account_id))?
            .try_into()
    }

    /// Lists enabled accounts, ordered by id.
    pub async fn list_enabled(&self) -> DbResult<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT account_id, access_token, refresh_token, expires_at, enabled
            FROM accounts
            WHERE enabled = 1
            ORDER BY account_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Account::try_from).collect()
    }

    /// Stores refreshed tokens.
    pub async fn update_tokens(
        &self,
        account_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                access_token = ?2,
                refresh_token = ?3,
                expires_at = ?4,
                updated_at = ?5
            WHERE account_id = ?1
            "#,
        )
        .bind(account_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(to_millis(expires_at))
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Account", account_id));
        }
        Ok(())
    }

    /// Enables or disables an account.
    pub async fn set_enabled(&self, account_id: &str, enabled: bool) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET enabled = ?2, updated_at = ?3 WHERE account_id = ?1",
        )
        .bind(account_id)
        .bind(enabled)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Account", account_id));
        }
        Ok(())
    }
}
