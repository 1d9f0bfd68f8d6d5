//! # Error Types
//!
//! Domain-specific error types for pulse-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  pulse-core errors (this file)                                         │
//! │  └── CoreError        - Window, cursor and record-shape violations     │
//! │                                                                         │
//! │  pulse-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  pulse-sync errors (separate crate)                                    │
//! │  └── SyncError        - Remote, retry and pass failures                │
//! │                                                                         │
//! │  Flow: CoreError → SyncError → AccountOutcome → worker exit code       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Core domain errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Window start lies after its end.
    #[error("Invalid search window: start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Millisecond value outside the representable range.
    #[error("Timestamp out of range: {0} ms")]
    InvalidTimestamp(i64),

    /// The search endpoint returned a `paging.next.after` that is not an integer.
    #[error("Invalid paging cursor: '{0}'")]
    InvalidCursor(String),

    /// A record is missing a field the engine needs.
    ///
    /// ## When This Occurs
    /// - `properties` is absent
    /// - `createdAt` or `updatedAt` is absent
    #[error("Malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    /// Unknown entity kind in persisted data or config.
    #[error("Unknown entity kind: '{0}'")]
    UnknownEntity(String),
}

impl CoreError {
    /// Creates a MalformedRecord error.
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::MalformedRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::malformed("m-1", "missing properties");
        assert_eq!(err.to_string(), "Malformed record m-1: missing properties");

        let err = CoreError::InvalidCursor("abc".to_string());
        assert_eq!(err.to_string(), "Invalid paging cursor: 'abc'");
    }
}
