//! # pulse-sync: Incremental Meeting Sync Engine
//!
//! Pulls meetings changed since each account's last pass from the HubSpot
//! CRM, turns them into Created/Updated events and advances the account's
//! checkpoint once the whole window has been read.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Pulse Sync Pass                                 │
//! │                                                                         │
//! │  CheckpointStore ──► window [last pulled, now]                          │
//! │                            │                                            │
//! │                            ▼                                            │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────────────┐  │
//! │  │ CursorPager  │───►│   Retrier    │───►│ CrmClient                │  │
//! │  │ after/rewind │    │ 2^n backoff  │    │ HubspotClient (reqwest)  │  │
//! │  └──────┬───────┘    │ + refresh    │    │ InMemoryCrm (tests)      │  │
//! │         │ pages      └──────▲───────┘    └──────────────────────────┘  │
//! │         ▼                   │ lookups                                   │
//! │  ┌──────────────────────────┴───┐    ┌──────────────────────────────┐  │
//! │  │ RecordTransformer            │───►│ EventQueue                   │  │
//! │  │ participants, classification │    │ memory / channel / outbox    │  │
//! │  └──────────────────────────────┘    └──────────────────────────────┘  │
//! │                                                                         │
//! │  end of results ──► CheckpointWriter::commit(now)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Pass
//! - [`engine`] - One pass for one account
//! - [`runner`] - Concurrent passes over every account
//! - [`pager`] - Search pagination with the offset-ceiling rewind
//! - [`transform`] - Participants lookup and event building
//! - [`checkpoint`] - Checkpoint stores and the writer
//! - [`queue`] - Event queue implementations
//!
//! ### Remote
//! - [`client`] - `CrmClient` trait and the HubSpot implementation
//! - [`retry`] - Attempt budget, exponential delay, credential refresh
//! - [`auth`] - Per-account OAuth credentials
//! - [`memory`] - In-memory CRM
//!
//! ### Support
//! - [`config`] - `pulse.toml` and environment overrides
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pulse_sync::{HubspotClient, OutboxQueue, SqliteCheckpointStore, SyncConfig, SyncEngine, SyncRunner};
//!
//! let config = SyncConfig::load(None)?;
//! let client = Arc::new(HubspotClient::new(&config.hubspot)?);
//! let engine = SyncEngine::new(
//!     client,
//!     Arc::new(SqliteCheckpointStore::new(db.clone())),
//!     Arc::new(OutboxQueue::new(db.clone())),
//!     config.engine.clone(),
//! );
//!
//! let outcomes = SyncRunner::new(Arc::new(engine))
//!     .run_all(credentials.all().await, &cancel)
//!     .await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod pager;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod transform;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{AccountCredentials, Credential, CredentialStore};
pub use checkpoint::{
    CheckpointStore, CheckpointWriter, InMemoryCheckpointStore, SqliteCheckpointStore,
};
pub use client::{CrmClient, HubspotClient};
pub use config::{AccountSeed, DatabaseSettings, EngineSettings, HubspotSettings, SyncConfig};
pub use engine::{PassReport, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use memory::{Failure, InMemoryCrm};
pub use pager::CursorPager;
pub use queue::{ChannelQueue, EventQueue, MemoryQueue, OutboxQueue, QueuedEvent};
pub use retry::{Retrier, RetryPolicy};
pub use runner::{AccountOutcome, SyncRunner};
pub use transform::{RecordTransformer, TransformedPage};
