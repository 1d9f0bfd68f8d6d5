//! # Event Queues
//!
//! Where a pass delivers its events. Appends from concurrent passes are
//! safe; within one push the order is kept.
//!
//! ```text
//! ┌────────────────┬──────────────────────────────────────────────────────┐
//! │ Queue          │ Backing                                              │
//! ├────────────────┼──────────────────────────────────────────────────────┤
//! │ MemoryQueue    │ tokio Mutex<Vec<QueuedEvent>>                        │
//! │ ChannelQueue   │ tokio mpsc sender, consumer owns the receiver        │
//! │ OutboxQueue    │ sync_events table, one transaction per push          │
//! └────────────────┴──────────────────────────────────────────────────────┘
//! ```
//!
//! A push that has to wait for room gives up with `Cancelled` once the
//! pass token fires.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use pulse_core::SyncEvent;
use pulse_db::Database;

/// Append-only destination of sync events.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Appends `events` for `account_id` in order.
    async fn push(
        &self,
        account_id: &str,
        events: Vec<SyncEvent>,
        cancel: &CancellationToken,
    ) -> SyncResult<()>;
}

/// An event tagged with its account.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub account_id: String,
    pub event: SyncEvent,
}

// =============================================================================
// Memory Queue
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryQueue {
    events: Mutex<Vec<QueuedEvent>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything pushed so far.
    pub async fn snapshot(&self) -> Vec<QueuedEvent> {
        self.events.lock().await.clone()
    }

    /// Events of one account, in push order.
    pub async fn events_for(&self, account_id: &str) -> Vec<SyncEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|queued| queued.account_id == account_id)
            .map(|queued| queued.event.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn push(
        &self,
        account_id: &str,
        events: Vec<SyncEvent>,
        _cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let mut queue = self.events.lock().await;
        queue.extend(events.into_iter().map(|event| QueuedEvent {
            account_id: account_id.to_string(),
            event,
        }));
        Ok(())
    }
}

// =============================================================================
// Channel Queue
// =============================================================================

/// Forwards events to an in-process consumer.
///
/// Room for a push is reserved before anything is sent, so a page that fits
/// the channel capacity arrives whole or not at all. Larger pages go out in
/// capacity-sized runs.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<QueuedEvent>,
}

impl ChannelQueue {
    /// Creates the queue and the receiver its consumer drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ChannelQueue { tx }, rx)
    }
}

#[async_trait]
impl EventQueue for ChannelQueue {
    async fn push(
        &self,
        account_id: &str,
        events: Vec<SyncEvent>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let capacity = self.tx.max_capacity();
        let mut events = events.into_iter();

        loop {
            let run = events.len().min(capacity);
            if run == 0 {
                return Ok(());
            }

            let permits = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                permits = self.tx.reserve_many(run) => {
                    permits.map_err(|_| SyncError::QueueClosed)?
                }
            };
            for (permit, event) in permits.zip(events.by_ref()) {
                permit.send(QueuedEvent {
                    account_id: account_id.to_string(),
                    event,
                });
            }
        }
    }
}

// =============================================================================
// Outbox Queue
// =============================================================================

/// Writes events to the `sync_events` outbox for a later delivery step.
#[derive(Debug, Clone)]
pub struct OutboxQueue {
    db: Database,
}

impl OutboxQueue {
    pub fn new(db: Database) -> Self {
        OutboxQueue { db }
    }
}

#[async_trait]
impl EventQueue for OutboxQueue {
    async fn push(
        &self,
        account_id: &str,
        events: Vec<SyncEvent>,
        _cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let written = self.db.events().append(account_id, &events).await?;
        debug!(account_id, written, "Queued events in outbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use pulse_core::EventName;
    use pulse_db::DbConfig;
    use serde_json::Map;

    fn event(id: &str) -> SyncEvent {
        SyncEvent::new(EventName::Created, Utc::now(), id, Map::new(), Vec::new())
    }

    #[tokio::test]
    async fn test_memory_queue_keeps_order_per_account() {
        let queue = MemoryQueue::new();
        let live = CancellationToken::new();
        queue.push("a", vec![event("1"), event("2")], &live).await.unwrap();
        queue.push("b", vec![event("x")], &live).await.unwrap();
        queue.push("a", vec![event("3")], &live).await.unwrap();

        let ids: Vec<String> = queue
            .events_for("a")
            .await
            .iter()
            .map(|e| e.record_id().to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(queue.len().await, 4);
    }

    #[tokio::test]
    async fn test_channel_queue_delivers_and_reports_closed() {
        let (queue, mut rx) = ChannelQueue::new(8);
        let live = CancellationToken::new();
        queue.push("a", vec![event("1"), event("2")], &live).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().event.record_id(), "1");
        assert_eq!(rx.recv().await.unwrap().event.record_id(), "2");

        drop(rx);
        assert!(matches!(
            queue.push("a", vec![event("3")], &live).await,
            Err(SyncError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_channel_queue_larger_than_capacity() {
        let (queue, mut rx) = ChannelQueue::new(2);
        let live = CancellationToken::new();

        let consumer = tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(queued) = rx.recv().await {
                ids.push(queued.event.record_id().to_string());
            }
            ids
        });

        let events = (0..5).map(|i| event(&i.to_string())).collect();
        queue.push("a", events, &live).await.unwrap();
        drop(queue);

        assert_eq!(consumer.await.unwrap(), vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_channel_push_gives_up_on_cancel() {
        let (queue, mut rx) = ChannelQueue::new(4);
        let live = CancellationToken::new();
        queue
            .push("a", vec![event("1"), event("2"), event("3")], &live)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        // two more events do not fit the one free slot
        let result = queue
            .push("a", vec![event("4"), event("5")], &cancel)
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));

        // nothing of the cancelled page reached the consumer
        let mut ids = Vec::new();
        while let Ok(queued) = rx.try_recv() {
            ids.push(queued.event.record_id().to_string());
        }
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_outbox_queue_persists_events() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = OutboxQueue::new(db.clone());

        queue
            .push("a", vec![event("1"), event("2")], &CancellationToken::new())
            .await
            .unwrap();

        let pending = db.events().get_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event.record_id(), "1");
        assert_eq!(db.events().count_pending().await.unwrap(), 2);
    }
}
