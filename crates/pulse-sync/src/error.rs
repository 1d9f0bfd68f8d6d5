//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │ Remote (retried)│  │ Remote (fatal)          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  RemoteRejected         │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  DeserializationFailed  │ │
//! │  │  ConfigLoad     │  │  RateLimited    │  │  RefreshFailed          │ │
//! │  │                 │  │  Unauthorized   │  │                         │ │
//! │  │                 │  │  Unavailable    │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │      Pass       │  │    Database     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Exhausted      │  │  DatabaseError  │  │  QueueClosed            │ │
//! │  │  Cancelled      │  │                 │  │  Internal               │ │
//! │  │  WindowStalled  │  │                 │  │                         │ │
//! │  │  InvalidCursor  │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the "retried" column is ever attempted twice. Everything else
//! propagates on first sight and aborts the pass without committing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_core::CoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Could not reach the CRM.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request did not complete in time.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// HTTP 429.
    #[error("Rate limited by remote (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401. The access token is stale or revoked.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 5xx.
    #[error("Remote unavailable (HTTP {status}): {body}")]
    RemoteUnavailable { status: u16, body: String },

    /// Any other non-success status.
    #[error("Remote rejected request (HTTP {status}): {body}")]
    RemoteRejected { status: u16, body: String },

    /// Response body did not match the expected shape.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Request body could not be encoded.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The token endpoint refused the refresh token.
    #[error("Credential refresh failed for account {account_id}: {reason}")]
    RefreshFailed { account_id: String, reason: String },

    // =========================================================================
    // Pass Errors
    // =========================================================================
    /// Every attempt of a remote call failed.
    ///
    /// Fatal for the pass. The checkpoint is left untouched so the next run
    /// covers the same window again.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: Box<SyncError>,
    },

    /// The pass-scoped cancellation token fired.
    #[error("Sync pass cancelled")]
    Cancelled,

    /// More records than the offset ceiling share one modification time, so
    /// rewinding cannot move the window forward.
    #[error("Search window stalled at {at}: too many records share one modification time")]
    WindowStalled { at: DateTime<Utc> },

    /// The page that hit the offset ceiling carried no modification time
    /// to rewind to.
    #[error("Offset ceiling reached on a page of {records} record(s) without updatedAt")]
    RewindUnanchored { records: usize },

    /// `paging.next.after` was not an integer.
    #[error("Invalid paging cursor: '{0}'")]
    InvalidCursor(String),

    /// Checkpoint lies after the pass start.
    #[error("Invalid search window: {0}")]
    InvalidWindow(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Database query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The receiving side of a channel queue is gone.
    #[error("Event queue closed")]
    QueueClosed,

    /// No credentials are registered for the account.
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    /// Internal sync error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<pulse_db::DbError> for SyncError {
    fn from(err: pulse_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCursor(after) => SyncError::InvalidCursor(after),
            err @ CoreError::InvalidWindow { .. } => SyncError::InvalidWindow(err.to_string()),
            CoreError::UnknownEntity(name) => {
                SyncError::InvalidConfig(format!("Unknown entity kind: '{}'", name))
            }
            other => SyncError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

/// Transport-level reqwest failures.
///
/// Status codes are mapped separately in the client, because reqwest only
/// reports them when `error_for_status` is used.
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::DeserializationFailed(err.to_string())
        } else if err.is_builder() {
            SyncError::InvalidConfig(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::from_status(status.as_u16(), err.to_string(), None)
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Maps a non-success HTTP status onto the taxonomy.
    ///
    /// ```text
    /// 401      → Unauthorized
    /// 429      → RateLimited
    /// 5xx      → RemoteUnavailable
    /// other    → RemoteRejected
    /// ```
    pub fn from_status(status: u16, body: String, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 => SyncError::Unauthorized(body),
            429 => SyncError::RateLimited { retry_after_secs },
            500..=599 => SyncError::RemoteUnavailable { status, body },
            _ => SyncError::RemoteRejected { status, body },
        }
    }

    /// Returns true if the call that produced this error may be attempted again.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - Rate limiting
    /// - Unauthorized (after a credential refresh)
    /// - 5xx responses
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Timeout(_)
                | SyncError::RateLimited { .. }
                | SyncError::Unauthorized(_)
                | SyncError::RemoteUnavailable { .. }
        )
    }

    /// Wait the remote asked for before the next call, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Returns true if this error says the credential is no good.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthorized(_) | SyncError::RefreshFailed { .. }
        )
    }
}
