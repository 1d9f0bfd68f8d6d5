//! # Sync Checkpoint Writer
//!
//! Where each account's "last pulled" timestamp lives, and the single place
//! that advances it.
//!
//! ```text
//!   pass start ── load ──► checkpoint T0 ──► window [T0, now]
//!        │
//!        ▼  ... every page fetched, every event queued ...
//!        │
//!   natural end of results ── CheckpointWriter::commit(now) ──► T1 = now
//!
//!   Exhausted / Cancelled / Stalled ──► nothing written, T0 kept
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::SyncResult;
use pulse_core::{EntityKind, SyncCheckpoint};
use pulse_db::Database;

// =============================================================================
// Checkpoint Store
// =============================================================================

/// Persistent per-account, per-entity checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Current checkpoint; `last_pulled_at` is `None` before the first pass.
    async fn load(&self, account_id: &str, entity: EntityKind) -> SyncResult<SyncCheckpoint>;

    async fn save(
        &self,
        account_id: &str,
        entity: EntityKind,
        last_pulled_at: DateTime<Utc>,
    ) -> SyncResult<()>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<(String, EntityKind), DateTime<Utc>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds one checkpoint.
    pub fn with_checkpoint(account_id: &str, entity: EntityKind, at: DateTime<Utc>) -> Self {
        let mut checkpoints = HashMap::new();
        checkpoints.insert((account_id.to_string(), entity), at);
        InMemoryCheckpointStore {
            checkpoints: Mutex::new(checkpoints),
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, account_id: &str, entity: EntityKind) -> SyncResult<SyncCheckpoint> {
        let checkpoints = self.checkpoints.lock().await;
        Ok(SyncCheckpoint {
            account_id: account_id.to_string(),
            entity,
            last_pulled_at: checkpoints.get(&(account_id.to_string(), entity)).copied(),
        })
    }

    async fn save(
        &self,
        account_id: &str,
        entity: EntityKind,
        last_pulled_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.checkpoints
            .lock()
            .await
            .insert((account_id.to_string(), entity), last_pulled_at);
        Ok(())
    }
}

/// `sync_checkpoints` table.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    pub fn new(db: Database) -> Self {
        SqliteCheckpointStore { db }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, account_id: &str, entity: EntityKind) -> SyncResult<SyncCheckpoint> {
        Ok(self.db.checkpoints().get(account_id, entity).await?)
    }

    async fn save(
        &self,
        account_id: &str,
        entity: EntityKind,
        last_pulled_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.db
            .checkpoints()
            .upsert(account_id, entity, last_pulled_at)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Checkpoint Writer
// =============================================================================

/// Advances checkpoints after a completed pass.
#[derive(Clone)]
pub struct CheckpointWriter {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointWriter {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        CheckpointWriter { store }
    }

    /// Sets the checkpoint to the pass start time.
    ///
    /// Only call this once the pager reported the natural end of results.
    pub async fn commit(
        &self,
        account_id: &str,
        entity: EntityKind,
        pass_started_at: DateTime<Utc>,
    ) -> SyncResult<SyncCheckpoint> {
        self.store
            .save(account_id, entity, pass_started_at)
            .await?;

        info!(
            account_id,
            entity = %entity,
            last_pulled_at = %pass_started_at,
            "Checkpoint committed"
        );

        Ok(SyncCheckpoint {
            account_id: account_id.to_string(),
            entity,
            last_pulled_at: Some(pass_started_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::from_millis;
    use pulse_db::{Account, DbConfig};

    #[tokio::test]
    async fn test_memory_store_defaults_to_initial() {
        let store = InMemoryCheckpointStore::new();
        let checkpoint = store.load("1", EntityKind::Meetings).await.unwrap();
        assert_eq!(checkpoint, SyncCheckpoint::initial("1", EntityKind::Meetings));
    }

    #[tokio::test]
    async fn test_writer_commits_through_store() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let writer = CheckpointWriter::new(store.clone());
        let at = from_millis(1_700_000_000_000).unwrap();

        let committed = writer.commit("1", EntityKind::Meetings, at).await.unwrap();
        assert_eq!(committed.last_pulled_at, Some(at));
        assert_eq!(
            store.load("1", EntityKind::Meetings).await.unwrap().last_pulled_at,
            Some(at)
        );
        assert_eq!(
            store.load("2", EntityKind::Meetings).await.unwrap().last_pulled_at,
            None
        );
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.accounts()
            .upsert(&Account {
                account_id: "1".into(),
                access_token: String::new(),
                refresh_token: "r".into(),
                expires_at: from_millis(0).unwrap(),
                enabled: true,
            })
            .await
            .unwrap();

        let store = SqliteCheckpointStore::new(db);
        assert_eq!(
            store.load("1", EntityKind::Meetings).await.unwrap().last_pulled_at,
            None
        );

        let at = from_millis(1_234_567).unwrap();
        store.save("1", EntityKind::Meetings, at).await.unwrap();
        assert_eq!(
            store.load("1", EntityKind::Meetings).await.unwrap().last_pulled_at,
            Some(at)
        );
    }
}
