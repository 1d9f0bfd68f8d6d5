//! # pulse-db: Database Layer for Pulse
//!
//! SQLite storage for connected accounts, sync checkpoints and the event
//! outbox, using sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Pulse Data Flow                                  │
//! │                                                                         │
//! │  pulse-sync (SqliteCheckpointStore, OutboxQueue)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     pulse-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │ SqlitePool    │◄───│ AccountRepo   │    │ 001_init.sql │  │   │
//! │  │   │               │    │ CheckpointRepo│    │              │  │   │
//! │  │   │               │    │ EventOutbox   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (path from [database] config)                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pulse_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("pulse.db")).await?;
//! let accounts = db.accounts().list_enabled().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::account::{Account, AccountRepository};
pub use repository::checkpoint::CheckpointRepository;
pub use repository::event::{EventOutboxRepository, StoredEvent};
