//! # Domain Types
//!
//! Core domain types used throughout Pulse.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ SyncCheckpoint  │   │  SearchWindow   │   │   PageCursor    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  account_id     │──►│  start (opt)    │◄──│  after (opt)    │       │
//! │  │  entity         │   │  end  ("now")   │   │  rewind (opt)   │       │
//! │  │  last_pulled_at │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                              │
//! │  │   SyncEvent     │   │   EventName     │                              │
//! │  │  ─────────────  │   │  ─────────────  │                              │
//! │  │  name           │──►│  Created        │                              │
//! │  │  occurred_at    │   │  Updated        │                              │
//! │  │  record_id      │   └─────────────────┘                              │
//! │  │  fields         │                                                    │
//! │  │  related_ids    │                                                    │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timestamps
//! All instants are `DateTime<Utc>`. The CRM and the database both speak
//! millisecond epochs, so [`from_millis`] and [`to_millis`] sit at every edge.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Timestamps
// =============================================================================

/// Converts a millisecond epoch into a UTC instant.
pub fn from_millis(ms: i64) -> CoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(CoreError::InvalidTimestamp(ms))
}

/// Converts a UTC instant into a millisecond epoch.
#[inline]
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

// =============================================================================
// Entity Kind
// =============================================================================

/// CRM object type a checkpoint tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Meetings,
}

impl EntityKind {
    /// Returns the storage key for this entity.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Meetings => "meetings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meetings" => Ok(EntityKind::Meetings),
            other => Err(CoreError::UnknownEntity(other.to_string())),
        }
    }
}

// =============================================================================
// Sync Checkpoint
// =============================================================================

/// Start of the next sync window for one account and entity.
///
/// `last_pulled_at` is `None` before the first successful pass, which makes
/// the next window unbounded below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub account_id: String,
    pub entity: EntityKind,
    pub last_pulled_at: Option<DateTime<Utc>>,
}

impl SyncCheckpoint {
    /// Checkpoint for an account that has never synced.
    pub fn initial(account_id: impl Into<String>, entity: EntityKind) -> Self {
        SyncCheckpoint {
            account_id: account_id.into(),
            entity,
            last_pulled_at: None,
        }
    }
}

// =============================================================================
// Search Window
// =============================================================================

/// Inclusive time range `[start, end]` of one pass.
///
/// `end` is fixed when the pass begins. Writes that land after it are left for
/// the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWindow {
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
}

impl SearchWindow {
    /// Creates a window, rejecting one whose start lies after its end.
    pub fn new(start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> CoreResult<Self> {
        if let Some(start) = start {
            if start > end {
                return Err(CoreError::InvalidWindow { start, end });
            }
        }
        Ok(SearchWindow { start, end })
    }

    #[inline]
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    #[inline]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns `true` if `ts` lies inside the window, both bounds inclusive.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| ts >= start) && ts <= self.end
    }
}

// =============================================================================
// Page Cursor
// =============================================================================

/// Pagination state of one pass.
///
/// ```text
///   after = None, rewind = None        first page of the window
///        │
///        ▼  page returned next.after = 100
///   after = Some(100)                  keep following the offset
///        │
///        ▼  next.after >= max offset
///   after = None, rewind = Some(t)     restart from last record's updatedAt
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    pub after: Option<u64>,
    pub rewind_timestamp: Option<DateTime<Utc>>,
}

impl PageCursor {
    /// Window start the next request should use.
    pub fn effective_start(&self, window: &SearchWindow) -> Option<DateTime<Utc>> {
        self.rewind_timestamp.or(window.start())
    }

    /// Follows the offset returned by the search endpoint.
    pub fn advance(&mut self, after: u64) {
        self.after = Some(after);
    }

    /// Drops the offset and narrows the window to start at `ts`.
    pub fn rewind(&mut self, ts: DateTime<Utc>) {
        self.after = None;
        self.rewind_timestamp = Some(ts);
    }
}

// =============================================================================
// Sync Event
// =============================================================================

/// Whether a record was created or only modified since the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    Created,
    Updated,
}

impl EventName {
    /// Action name written to the queue.
    pub const fn action_name(&self) -> &'static str {
        match self {
            EventName::Created => "Meeting Created",
            EventName::Updated => "Meeting Updated",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_name())
    }
}

/// The unit pushed to the output queue.
///
/// Immutable once built. Fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    name: EventName,
    occurred_at: DateTime<Utc>,
    record_id: String,
    fields: Map<String, Value>,
    related_ids: Vec<String>,
}

impl SyncEvent {
    pub fn new(
        name: EventName,
        occurred_at: DateTime<Utc>,
        record_id: impl Into<String>,
        fields: Map<String, Value>,
        related_ids: Vec<String>,
    ) -> Self {
        SyncEvent {
            name,
            occurred_at,
            record_id: record_id.into(),
            fields,
            related_ids,
        }
    }

    #[inline]
    pub fn name(&self) -> EventName {
        self.name
    }

    #[inline]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    #[inline]
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    #[inline]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[inline]
    pub fn related_ids(&self) -> &[String] {
        &self.related_ids
    }
}
