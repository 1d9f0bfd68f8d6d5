//! # Sync Engine
//!
//! One incremental pass for one account.
//!
//! ## Pass Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sync Pass                                      │
//! │                                                                         │
//! │  1. now = clock                                                        │
//! │  2. checkpoint T0 = CheckpointStore::load                              │
//! │  3. window = [T0, now]   (unbounded below on the first pass)           │
//! │                                                                         │
//! │  4. loop CursorPager::next_page                                        │
//! │       ├─ drop ids already seen this pass (rewind overlap)              │
//! │       ├─ defer records modified after `now`                            │
//! │       ├─ RecordTransformer::transform_page (participants, classify)    │
//! │       ├─ cancelled? → stop, nothing of this page is queued             │
//! │       └─ EventQueue::push (whole page, gives up on cancel)             │
//! │                                                                         │
//! │  5. end of results → CheckpointWriter::commit(now)                     │
//! │                                                                         │
//! │  Any error in 4 aborts the pass; the checkpoint stays at T0 and the    │
//! │  next run covers the same window again.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::AccountCredentials;
use crate::checkpoint::{CheckpointStore, CheckpointWriter};
use crate::client::CrmClient;
use crate::config::EngineSettings;
use crate::error::{SyncError, SyncResult};
use crate::pager::CursorPager;
use crate::queue::EventQueue;
use crate::retry::{Retrier, RetryPolicy};
use crate::transform::RecordTransformer;
use pulse_core::{EntityKind, SearchWindow};

// =============================================================================
// Pass Report
// =============================================================================

/// Statistics of a completed pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub account_id: String,
    pub window: SearchWindow,
    pub pages: usize,
    pub records_seen: usize,
    pub events_emitted: usize,
    /// Records delivered again after a rewind.
    pub duplicates_skipped: usize,
    pub malformed_skipped: usize,
    /// Records modified after the window end, left for the next pass.
    pub deferred: usize,
    pub rewinds: usize,
    pub committed: DateTime<Utc>,
}

#[derive(Default)]
struct PassCounters {
    records_seen: usize,
    events_emitted: usize,
    duplicates_skipped: usize,
    malformed_skipped: usize,
    deferred: usize,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Runs passes against one CRM with shared stores.
pub struct SyncEngine {
    client: Arc<dyn CrmClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    writer: CheckpointWriter,
    queue: Arc<dyn EventQueue>,
    settings: EngineSettings,
    policy: RetryPolicy,
}

impl SyncEngine {
    pub fn new(
        client: Arc<dyn CrmClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        queue: Arc<dyn EventQueue>,
        settings: EngineSettings,
    ) -> Self {
        let policy = RetryPolicy::from_settings(&settings);
        SyncEngine {
            client,
            writer: CheckpointWriter::new(Arc::clone(&checkpoints)),
            checkpoints,
            queue,
            settings,
            policy,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Runs a pass with the window ending at the current time.
    pub async fn run_pass(
        &self,
        credentials: Arc<AccountCredentials>,
        cancel: CancellationToken,
    ) -> SyncResult<PassReport> {
        self.run_pass_at(credentials, cancel, Utc::now()).await
    }

    /// Runs a pass whose window ends at `now`.
    ///
    /// On success the checkpoint equals `now`. On any error it is unchanged.
    #[instrument(
        name = "sync_pass",
        skip_all,
        fields(account_id = %credentials.account_id(), now = %now)
    )]
    pub async fn run_pass_at(
        &self,
        credentials: Arc<AccountCredentials>,
        cancel: CancellationToken,
        now: DateTime<Utc>,
    ) -> SyncResult<PassReport> {
        let result = self.pass(credentials, cancel, now).await;

        match &result {
            Ok(report) => info!(
                pages = report.pages,
                records = report.records_seen,
                events = report.events_emitted,
                duplicates = report.duplicates_skipped,
                malformed = report.malformed_skipped,
                deferred = report.deferred,
                rewinds = report.rewinds,
                "Sync pass complete"
            ),
            Err(SyncError::Cancelled) => warn!("Sync pass cancelled, checkpoint unchanged"),
            Err(e) => error!(error = %e, "Sync pass aborted, checkpoint unchanged"),
        }

        result
    }

    async fn pass(
        &self,
        credentials: Arc<AccountCredentials>,
        cancel: CancellationToken,
        now: DateTime<Utc>,
    ) -> SyncResult<PassReport> {
        let account_id = credentials.account_id().to_string();
        let checkpoint = self
            .checkpoints
            .load(&account_id, EntityKind::Meetings)
            .await?;
        let checkpoint_before = checkpoint.last_pulled_at;
        let window = SearchWindow::new(checkpoint_before, now)?;

        info!(
            window_start = ?window.start(),
            window_end = %window.end(),
            "Sync pass started"
        );

        let retrier = Retrier::new(
            self.policy,
            Arc::clone(&self.client),
            credentials,
            cancel.clone(),
        );
        let mut pager = CursorPager::new(&retrier, window)
            .with_page_size(self.settings.page_size)
            .with_max_offset(self.settings.max_offset);
        let transformer =
            RecordTransformer::new(&retrier).batched(self.settings.batch_participant_lookups);

        let mut seen: HashSet<String> = HashSet::new();
        let mut counters = PassCounters::default();

        while let Some(records) = pager.next_page().await? {
            counters.records_seen += records.len();

            let mut fresh = Vec::with_capacity(records.len());
            for record in records {
                if !seen.insert(record.id.clone()) {
                    counters.duplicates_skipped += 1;
                    continue;
                }
                if let Some(modified) = record.modified_at() {
                    if !window.contains(modified) {
                        debug!(record_id = %record.id, %modified, "Deferring record outside window");
                        counters.deferred += 1;
                        continue;
                    }
                }
                fresh.push(record);
            }

            let page = transformer.transform_page(&fresh, checkpoint_before).await?;
            counters.malformed_skipped += page.malformed;

            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            counters.events_emitted += page.events.len();
            self.queue.push(&account_id, page.events, &cancel).await?;
        }

        let committed = self
            .writer
            .commit(&account_id, EntityKind::Meetings, now)
            .await?;

        Ok(PassReport {
            account_id,
            window,
            pages: pager.pages(),
            records_seen: counters.records_seen,
            events_emitted: counters.events_emitted,
            duplicates_skipped: counters.duplicates_skipped,
            malformed_skipped: counters.malformed_skipped,
            deferred: counters.deferred,
            rewinds: pager.rewinds(),
            committed: committed.last_pulled_at.unwrap_or(now),
        })
    }
}
