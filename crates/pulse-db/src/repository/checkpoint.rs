//! # Sync Checkpoint Repository
//!
//! One row per `(account_id, entity)`. The row is written only after a pass
//! reaches the natural end of its results, so a missing row means the
//! account has never completed a pass.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use pulse_core::{from_millis, to_millis, EntityKind, SyncCheckpoint};

/// Repository for checkpoint operations.
#[derive(Debug, Clone)]
pub struct CheckpointRepository {
    pool: SqlitePool,
}

impl CheckpointRepository {
    /// Creates a new CheckpointRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CheckpointRepository { pool }
    }

    /// Loads the checkpoint, or an initial one if none was ever written.
    pub async fn get(&self, account_id: &str, entity: EntityKind) -> DbResult<SyncCheckpoint> {
        let last_pulled: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT last_pulled_at
            FROM sync_checkpoints
            WHERE account_id = ?1 AND entity = ?2
            "#,
        )
        .bind(account_id)
        .bind(entity.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(SyncCheckpoint {
            account_id: account_id.to_string(),
            entity,
            last_pulled_at: last_pulled.map(from_millis).transpose()?,
        })
    }

    /// Sets `last_pulled_at`, inserting the row if needed.
    pub async fn upsert(
        &self,
        account_id: &str,
        entity: EntityKind,
        last_pulled_at: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(
            account_id = %account_id,
            entity = %entity,
            last_pulled_at = %last_pulled_at,
            "Writing checkpoint"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (account_id, entity, last_pulled_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (account_id, entity) DO UPDATE SET
                last_pulled_at = excluded.last_pulled_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id)
        .bind(entity.as_str())
        .bind(to_millis(last_pulled_at))
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists every checkpoint of an account.
    pub async fn list_for_account(&self, account_id: &str) -> DbResult<Vec<SyncCheckpoint>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT entity, last_pulled_at
            FROM sync_checkpoints
            WHERE account_id = ?1
            ORDER BY entity ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(entity, last_pulled)| -> DbResult<SyncCheckpoint> {
                Ok(SyncCheckpoint {
                    account_id: account_id.to_string(),
                    entity: entity.parse()?,
                    last_pulled_at: Some(from_millis(last_pulled)?),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::account::Account;
    use crate::{Database, DbConfig, DbError};

    async fn db_with_account(id: &str) -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.accounts()
            .upsert(&Account {
                account_id: id.to_string(),
                access_token: "at".to_string(),
                refresh_token: "rt".to_string(),
                expires_at: Utc::now(),
                enabled: true,
            })
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_initial() {
        let db = db_with_account("1").await;
        let checkpoint = db.checkpoints().get("1", EntityKind::Meetings).await.unwrap();
        assert_eq!(checkpoint, SyncCheckpoint::initial("1", EntityKind::Meetings));
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let db = db_with_account("1").await;
        let repo = db.checkpoints();

        repo.upsert("1", EntityKind::Meetings, from_millis(1_000).unwrap())
            .await
            .unwrap();
        repo.upsert("1", EntityKind::Meetings, from_millis(2_000).unwrap())
            .await
            .unwrap();

        let checkpoint = repo.get("1", EntityKind::Meetings).await.unwrap();
        assert_eq!(checkpoint.last_pulled_at, Some(from_millis(2_000).unwrap()));
        assert_eq!(repo.list_for_account("1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_requires_account() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let result = db
            .checkpoints()
            .upsert("ghost", EntityKind::Meetings, Utc::now())
            .await;
        assert!(matches!(result, Err(DbError::ForeignKeyViolation { .. })));
    }
}
