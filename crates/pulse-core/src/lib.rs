//! # pulse-core: Pure Types for the Pulse Sync Engine
//!
//! This crate holds every type and rule of the incremental meeting sync that
//! can be expressed without I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Pulse Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    pulse-worker (binary)                        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │      pulse-sync: Retrier ─► Pager ─► Transformer ─► Queue      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ pulse-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  filter   │  │  remote   │  │ transform │  │   │
//! │  │   │  Window   │  │  GTE/LTE  │  │ Search    │  │ Created / │  │   │
//! │  │   │  Cursor   │  │  ms epoch │  │ DTOs      │  │ Updated   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO CLOCK                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Checkpoints, search windows, page cursors, sync events
//! - [`filter`] - The "modified since" range filter
//! - [`remote`] - Request/response shapes of the CRM endpoints
//! - [`transform`] - Meeting record parsing and Created/Updated classification
//! - [`error`] - Domain error types

pub mod error;
pub mod filter;
pub mod remote;
pub mod transform;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use filter::{build_filter, Filter, FilterGroup, FilterOperator};
pub use transform::{classify, MeetingRecord};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Deepest `after` offset the CRM search endpoint will honour.
///
/// Once a returned cursor reaches this value the pager stops following the
/// offset and re-windows the query on the last seen modification time.
pub const MAX_OFFSET: u64 = 9900;

/// Records requested per search page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Property the search window filters and sorts on.
pub const LAST_MODIFIED_PROPERTY: &str = "hs_lastmodifieddate";

/// Meeting properties requested from the search endpoint.
pub const MEETING_PROPERTIES: [&str; 3] = [
    "hs_meeting_title",
    "hs_meeting_start_time",
    "hs_meeting_end_time",
];
