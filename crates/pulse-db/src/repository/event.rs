//! # Event Outbox Repository
//!
//! Durable output queue for emitted sync events.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Event Outbox                                         │
//! │                                                                         │
//! │  SYNC PASS (one page finished transforming)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  INSERT INTO sync_events (...) × page size                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← The whole page lands or none of it does                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            DOWNSTREAM CONSUMER                                  │   │
//! │  │  1. SELECT ... WHERE delivered_at IS NULL ORDER BY insertion    │   │
//! │  │  2. Deliver, then UPDATE sync_events SET delivered_at = NOW()   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use pulse_core::{from_millis, to_millis, SyncEvent};

/// An outbox row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: String,
    pub account_id: String,
    pub event: SyncEvent,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    account_id: String,
    payload: String,
    created_at: i64,
    delivered_at: Option<i64>,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = DbError;

    fn try_from(row: EventRow) -> DbResult<Self> {
        Ok(StoredEvent {
            id: row.id,
            account_id: row.account_id,
            event: serde_json::from_str(&row.payload)?,
            created_at: from_millis(row.created_at)?,
            delivered_at: row.delivered_at.map(from_millis).transpose()?,
        })
    }
}

/// Repository for the sync event outbox.
#[derive(Debug, Clone)]
pub struct EventOutboxRepository {
    pool: SqlitePool,
}

impl EventOutboxRepository {
    /// Creates a new EventOutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EventOutboxRepository { pool }
    }

    /// Appends events in one transaction, preserving their order.
    ///
    /// ## Returns
    /// Number of rows written.
    pub async fn append(&self, account_id: &str, events: &[SyncEvent]) -> DbResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let now = to_millis(Utc::now());
        let mut tx = self.pool.begin().await?;

        for event in events {
            let payload = serde_json::to_string(event)?;
            sqlx::query(
                r#"
                INSERT INTO sync_events (
                    id, account_id, action_name, record_id,
                    occurred_at, payload, created_at, delivered_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(account_id)
            .bind(event.name().action_name())
            .bind(event.record_id())
            .bind(to_millis(event.occurred_at()))
            .bind(payload)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            account_id = %account_id,
            count = events.len(),
            "Appended events to outbox"
        );

        Ok(events.len())
    }

    /// Gets undelivered events, oldest first.
    pub async fn get_pending(&self, limit: u32) -> DbResult<Vec<StoredEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, payload, created_at, delivered_at
            FROM sync_events
            WHERE delivered_at IS NULL
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredEvent::try_from).collect()
    }

    /// Marks an event as handed to the downstream consumer.
    pub async fn mark_delivered(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE sync_events SET delivered_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(to_millis(Utc::now()))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SyncEvent", id));
        }
        Ok(())
    }

    /// Counts undelivered events.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sync_events WHERE delivered_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

}
