//! # In-Memory CRM
//!
//! A [`CrmClient`] backed by plain collections. It honours the search
//! contract the engine depends on (range filters on the modification time,
//! ascending sort, `after` offsets, an offset ceiling) and lets callers
//! inject failures and watch call counts.
//!
//! Used by the test suites in place of the HubSpot API.
//!
//! ```text
//!   meetings (sorted by updatedAt) ──► search ──► [after .. after+limit]
//!   associations meeting → contacts ──► meeting_contacts
//!   contacts id → email             ──► read_contacts
//!   token counter                   ──► refresh_token
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::client::CrmClient;
use crate::error::{SyncError, SyncResult};
use pulse_core::filter::{FilterGroup, FilterOperator};
use pulse_core::remote::{
    AssociatedObject, AssociationResult, BatchReadRequest, BatchResponse, CrmObject, NextPage,
    ObjectId, Paging, RawRecord, SearchPage, SearchRequest, TokenGrant,
};
use pulse_core::{to_millis, LAST_MODIFIED_PROPERTY};

/// Deepest offset the real search endpoint accepts.
pub const DEFAULT_OFFSET_LIMIT: u64 = 10_000;

/// Lifetime of issued access tokens (seconds).
const TOKEN_LIFETIME_SECS: i64 = 1800;

/// Kind of failure to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Unavailable,
    Unauthorized,
    RateLimited,
    Timeout,
    ConnectionReset,
    Rejected,
    Garbled,
}

impl Failure {
    fn to_error(self) -> SyncError {
        match self {
            Failure::Unavailable => SyncError::RemoteUnavailable {
                status: 503,
                body: "service unavailable".into(),
            },
            Failure::Unauthorized => SyncError::Unauthorized("expired token".into()),
            Failure::RateLimited => SyncError::RateLimited {
                retry_after_secs: Some(1),
            },
            Failure::Timeout => SyncError::Timeout("request deadline".into()),
            Failure::ConnectionReset => SyncError::ConnectionFailed("connection reset".into()),
            Failure::Rejected => SyncError::RemoteRejected {
                status: 400,
                body: "bad request".into(),
            },
            Failure::Garbled => SyncError::DeserializationFailed("unexpected body".into()),
        }
    }
}

#[derive(Default)]
struct CrmState {
    meetings: Vec<RawRecord>,
    associations: HashMap<String, Vec<String>>,
    contacts: HashMap<String, Option<String>>,
    search_failures: VecDeque<Failure>,
    persistent_search_failure: Option<Failure>,
    lookup_failures: VecDeque<Option<Failure>>,
    fail_refreshes: bool,
    valid_token: Option<String>,
    token_seq: u64,
    offset_limit: u64,
    token_lifetime: Option<i64>,
    cancel_on_lookup: Option<CancellationToken>,
    search_log: Vec<SearchRequest>,
}

/// In-memory [`CrmClient`].
pub struct InMemoryCrm {
    state: Mutex<CrmState>,
    search_calls: AtomicUsize,
    association_calls: AtomicUsize,
    contact_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl Default for InMemoryCrm {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCrm {
    pub fn new() -> Self {
        InMemoryCrm {
            state: Mutex::new(CrmState {
                offset_limit: DEFAULT_OFFSET_LIMIT,
                ..CrmState::default()
            }),
            search_calls: AtomicUsize::new(0),
            association_calls: AtomicUsize::new(0),
            contact_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, CrmState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Builds a meeting record with a title property.
    pub fn meeting(id: &str, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> RawRecord {
        let mut properties = Map::new();
        properties.insert(
            "hs_meeting_title".into(),
            Value::String(format!("Meeting {}", id)),
        );
        properties.insert(
            LAST_MODIFIED_PROPERTY.into(),
            Value::String(to_millis(updated_at).to_string()),
        );
        RawRecord {
            id: id.to_string(),
            properties: Some(properties),
            created_at: Some(created_at),
            updated_at: Some(updated_at),
            archived: false,
        }
    }

    pub fn insert_meeting(&self, record: RawRecord) {
        self.state().meetings.push(record);
    }

    pub fn insert_meetings(&self, records: impl IntoIterator<Item = RawRecord>) {
        self.state().meetings.extend(records);
    }

    /// Replaces a meeting with the same id, or inserts it.
    pub fn upsert_meeting(&self, record: RawRecord) {
        let mut state = self.state();
        match state.meetings.iter_mut().find(|m| m.id == record.id) {
            Some(existing) => *existing = record,
            None => state.meetings.push(record),
        }
    }

    /// Associates a contact with a meeting.
    pub fn link_contact(&self, meeting_id: &str, contact_id: &str, email: Option<&str>) {
        let mut state = self.state();
        state
            .associations
            .entry(meeting_id.to_string())
            .or_default()
            .push(contact_id.to_string());
        state
            .contacts
            .insert(contact_id.to_string(), email.map(str::to_string));
    }

    // =========================================================================
    // Behaviour
    // =========================================================================

    /// The next `count` searches fail with `failure`.
    pub fn fail_searches(&self, count: usize, failure: Failure) {
        self.state()
            .search_failures
            .extend(std::iter::repeat(failure).take(count));
    }

    /// Every search fails with `failure` until cleared with `None`.
    pub fn fail_all_searches(&self, failure: Option<Failure>) {
        self.state().persistent_search_failure = failure;
    }

    /// The next `count` association or contact reads fail with `failure`.
    pub fn fail_lookups(&self, count: usize, failure: Failure) {
        self.fail_lookups_after(0, count, failure);
    }

    /// The next `skip` lookups succeed, the `count` after them fail.
    pub fn fail_lookups_after(&self, skip: usize, count: usize, failure: Failure) {
        let mut state = self.state();
        state.lookup_failures.extend(std::iter::repeat(None).take(skip));
        state
            .lookup_failures
            .extend(std::iter::repeat(Some(failure)).take(count));
    }

    pub fn fail_refreshes(&self, fail: bool) {
        self.state().fail_refreshes = fail;
    }

    /// `expires_in` reported by the next refreshes.
    pub fn set_token_lifetime(&self, secs: i64) {
        self.state().token_lifetime = Some(secs);
    }

    /// Only `token` is accepted until the next refresh replaces it.
    pub fn require_token(&self, token: &str) {
        self.state().valid_token = Some(token.to_string());
    }

    /// Offset at which searches are rejected.
    pub fn set_offset_limit(&self, limit: u64) {
        self.state().offset_limit = limit;
    }

    /// Cancels `token` from inside the next association read.
    pub fn cancel_on_lookup(&self, token: CancellationToken) {
        self.state().cancel_on_lookup = Some(token);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn association_calls(&self) -> usize {
        self.association_calls.load(Ordering::SeqCst)
    }

    pub fn contact_calls(&self) -> usize {
        self.contact_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Every search request received, in order.
    pub fn search_requests(&self) -> Vec<SearchRequest> {
        self.state().search_log.clone()
    }

    fn check_token(state: &CrmState, access_token: &str) -> SyncResult<()> {
        match &state.valid_token {
            Some(valid) if valid != access_token => {
                Err(SyncError::Unauthorized("token rejected".into()))
            }
            _ => Ok(()),
        }
    }
}

fn property_millis(record: &RawRecord, property: &str) -> Option<i64> {
    if property == LAST_MODIFIED_PROPERTY {
        return record.updated_at.map(to_millis);
    }
    record
        .properties
        .as_ref()?
        .get(property)?
        .as_str()?
        .parse()
        .ok()
}

fn matches_group(record: &RawRecord, group: &FilterGroup) -> bool {
    group.filters.iter().all(|filter| {
        let Ok(bound) = filter.value.parse::<i64>() else {
            return false;
        };
        match property_millis(record, &filter.property_name) {
            Some(value) => match filter.operator {
                FilterOperator::Gte => value >= bound,
                FilterOperator::Lte => value <= bound,
            },
            None => false,
        }
    })
}

#[async_trait]
impl CrmClient for InMemoryCrm {
    async fn search_meetings(
        &self,
        access_token: &str,
        request: &SearchRequest,
    ) -> SyncResult<SearchPage> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.search_log.push(request.clone());

        if let Some(failure) = state.search_failures.pop_front() {
            return Err(failure.to_error());
        }
        if let Some(failure) = state.persistent_search_failure {
            return Err(failure.to_error());
        }
        Self::check_token(&state, access_token)?;

        let offset = match request.after.as_deref() {
            None => 0,
            Some(raw) => raw.parse::<u64>().map_err(|_| SyncError::RemoteRejected {
                status: 400,
                body: format!("invalid after: {}", raw),
            })?,
        };
        if offset >= state.offset_limit {
            return Err(SyncError::RemoteRejected {
                status: 400,
                body: format!("offset {} beyond limit {}", offset, state.offset_limit),
            });
        }

        let mut matching: Vec<&RawRecord> = state
            .meetings
            .iter()
            .filter(|record| {
                request.filter_groups.is_empty()
                    || request
                        .filter_groups
                        .iter()
                        .any(|group| matches_group(record, group))
            })
            .collect();
        matching.sort_by_key(|record| record.updated_at);

        let start = (offset as usize).min(matching.len());
        let end = (start + request.limit as usize).min(matching.len());
        let results: Vec<RawRecord> = matching[start..end].iter().map(|r| (*r).clone()).collect();

        let paging = (end < matching.len()).then(|| Paging {
            next: Some(NextPage {
                after: end.to_string(),
            }),
        });

        Ok(SearchPage { results, paging })
    }

    async fn meeting_contacts(
        &self,
        access_token: &str,
        request: &BatchReadRequest,
    ) -> SyncResult<BatchResponse<AssociationResult>> {
        self.association_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();

        if let Some(token) = state.cancel_on_lookup.take() {
            token.cancel();
        }
        if let Some(Some(failure)) = state.lookup_failures.pop_front() {
            return Err(failure.to_error());
        }
        Self::check_token(&state, access_token)?;

        let results = request
            .ids()
            .filter_map(|id| {
                let linked = state.associations.get(id)?;
                (!linked.is_empty()).then(|| AssociationResult {
                    from: ObjectId { id: id.to_string() },
                    to: linked
                        .iter()
                        .map(|contact| AssociatedObject {
                            id: contact.clone(),
                        })
                        .collect(),
                })
            })
            .collect();

        Ok(BatchResponse { results })
    }

    async fn read_contacts(
        &self,
        access_token: &str,
        request: &BatchReadRequest,
    ) -> SyncResult<BatchResponse<CrmObject>> {
        self.contact_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();

        if let Some(Some(failure)) = state.lookup_failures.pop_front() {
            return Err(failure.to_error());
        }
        Self::check_token(&state, access_token)?;

        let results = request
            .ids()
            .filter_map(|id| {
                let email = state.contacts.get(id)?;
                let mut properties = Map::new();
                if let Some(email) = email {
                    properties.insert("email".into(), Value::String(email.clone()));
                }
                Some(CrmObject {
                    id: id.to_string(),
                    properties,
                })
            })
            .collect();

        Ok(BatchResponse { results })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> SyncResult<TokenGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();

        if state.fail_refreshes {
            return Err(SyncError::RemoteRejected {
                status: 400,
                body: "invalid_grant".into(),
            });
        }

        state.token_seq += 1;
        let access_token = format!("token-{}", state.token_seq);
        if state.valid_token.is_some() {
            state.valid_token = Some(access_token.clone());
        }

        Ok(TokenGrant {
            access_token,
            refresh_token: Some(format!("refresh-{}", state.token_seq)),
            expires_in: state.token_lifetime.unwrap_or(TOKEN_LIFETIME_SECS),
        })
    }
}
