//! # Repository Module
//!
//! Database repository implementations for Pulse.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Sync engine / worker                                                  │
//! │       │                                                                 │
//! │       │  db.checkpoints().get("123", EntityKind::Meetings)             │
//! │       ▼                                                                 │
//! │  CheckpointRepository                                                  │
//! │  ├── get(&self, account_id, entity)                                    │
//! │  ├── upsert(&self, account_id, entity, ts)                             │
//! │  └── list_for_account(&self, account_id)                               │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`AccountRepository`](account::AccountRepository) - Portals and OAuth tokens
//! - [`CheckpointRepository`](checkpoint::CheckpointRepository) - Last pulled timestamps
//! - [`EventOutboxRepository`](event::EventOutboxRepository) - Emitted sync events

pub mod account;
pub mod checkpoint;
pub mod event;
