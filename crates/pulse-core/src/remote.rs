//! # CRM Wire Types
//!
//! Request and response shapes of the four remote calls the engine makes.
//! Only the fields the engine reads are modelled; everything else is ignored
//! on decode.
//!
//! ```text
//! ┌──────────────────────┬───────────────────────────┬─────────────────────────┐
//! │ Call                 │ Request                   │ Response                │
//! ├──────────────────────┼───────────────────────────┼─────────────────────────┤
//! │ meeting search       │ SearchRequest             │ SearchPage              │
//! │ meeting → contacts   │ BatchReadRequest          │ BatchResponse<Assoc..>  │
//! │ contact details      │ BatchReadRequest          │ BatchResponse<CrmObj..> │
//! │ token refresh        │ RefreshRequest (form)     │ TokenGrant              │
//! └──────────────────────┴───────────────────────────┴─────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::filter::{FilterGroup, Sort};

// =============================================================================
// Search
// =============================================================================

/// Body of a paged search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_groups: Vec<FilterGroup>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub properties: Vec<String>,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub results: Vec<RawRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextPage {
    pub after: String,
}

impl SearchPage {
    /// Parses `paging.next.after`.
    ///
    /// `Ok(None)` means the result set is exhausted.
    pub fn next_after(&self) -> CoreResult<Option<u64>> {
        match self.paging.as_ref().and_then(|p| p.next.as_ref()) {
            None => Ok(None),
            Some(next) => next
                .after
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| CoreError::InvalidCursor(next.after.clone())),
        }
    }
}

/// A CRM record as returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub id: String,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
}

impl RawRecord {
    /// Modification time the search window sorts on.
    #[inline]
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

// =============================================================================
// Batch Reads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectId {
    pub id: String,
}

/// Body of the association and contact batch reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReadRequest {
    pub inputs: Vec<ObjectId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
}

impl BatchReadRequest {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BatchReadRequest {
            inputs: ids.into_iter().map(|id| ObjectId { id: id.into() }).collect(),
            properties: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: &[&str]) -> Self {
        self.properties = properties.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|input| input.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> Default for BatchResponse<T> {
    fn default() -> Self {
        BatchResponse {
            results: Vec::new(),
        }
    }
}

/// Contacts associated with one meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationResult {
    pub from: ObjectId,
    #[serde(default)]
    pub to: Vec<AssociatedObject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedObject {
    pub id: String,
}

/// A CRM object returned by a batch read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmObject {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl CrmObject {
    /// Non-empty string value of a property.
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

// =============================================================================
// OAuth
// =============================================================================

/// Form body of a refresh-token grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub refresh_token: &'a str,
}

impl<'a> RefreshRequest<'a> {
    pub fn new(client_id: &'a str, client_secret: &'a str, refresh_token: &'a str) -> Self {
        RefreshRequest {
            grant_type: "refresh_token",
            client_id,
            client_secret,
            refresh_token,
        }
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(alias = "expiresIn")]
    pub expires_in: i64,
}
