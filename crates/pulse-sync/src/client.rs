//! # CRM Client
//!
//! The four remote calls the engine makes, behind [`CrmClient`], and the
//! reqwest implementation that talks to the HubSpot REST API.
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────────┐
//! │ CrmClient method     │ HTTP                                             │
//! ├──────────────────────┼──────────────────────────────────────────────────┤
//! │ search_meetings      │ POST /crm/v3/objects/meetings/search             │
//! │ meeting_contacts     │ POST /crm/v3/associations/meetings/contacts/     │
//! │                      │      batch/read                                  │
//! │ read_contacts        │ POST /crm/v3/objects/contacts/batch/read         │
//! │ refresh_token        │ POST /oauth/v1/token (form encoded)              │
//! └──────────────────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! The client never retries. Every failure is mapped onto [`SyncError`] and
//! the [`Retrier`](crate::retry::Retrier) decides what happens next.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::HubspotSettings;
use crate::error::{SyncError, SyncResult};
use pulse_core::remote::{
    AssociationResult, BatchReadRequest, BatchResponse, CrmObject, RefreshRequest, SearchPage,
    SearchRequest, TokenGrant,
};

const SEARCH_PATH: &str = "crm/v3/objects/meetings/search";
const ASSOCIATIONS_PATH: &str = "crm/v3/associations/meetings/contacts/batch/read";
const CONTACTS_PATH: &str = "crm/v3/objects/contacts/batch/read";
const TOKEN_PATH: &str = "oauth/v1/token";

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

// =============================================================================
// Client Trait
// =============================================================================

/// Remote CRM operations used by a sync pass.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// One page of the meeting search.
    async fn search_meetings(
        &self,
        access_token: &str,
        request: &SearchRequest,
    ) -> SyncResult<SearchPage>;

    /// Contacts associated with each requested meeting.
    async fn meeting_contacts(
        &self,
        access_token: &str,
        request: &BatchReadRequest,
    ) -> SyncResult<BatchResponse<AssociationResult>>;

    /// Contact details for the requested ids.
    async fn read_contacts(
        &self,
        access_token: &str,
        request: &BatchReadRequest,
    ) -> SyncResult<BatchResponse<CrmObject>>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh_token(&self, refresh_token: &str) -> SyncResult<TokenGrant>;
}

// =============================================================================
// HubSpot Client
// =============================================================================

/// reqwest-backed [`CrmClient`].
#[derive(Debug, Clone)]
pub struct HubspotClient {
    http: reqwest::Client,
    base: Url,
    client_id: String,
    client_secret: String,
}

impl HubspotClient {
    /// Builds a client from the `[hubspot]` settings.
    pub fn new(settings: &HubspotSettings) -> SyncResult<Self> {
        let mut base = Url::parse(&settings.api_base)?;
        // Url::join drops the last segment unless the base ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("pulse-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HubspotClient {
            http,
            base,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
        })
    }

    /// Full URL of an endpoint path.
    pub fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base.join(path)?)
    }

    async fn post_json<B, T>(&self, access_token: &str, path: &str, body: &B) -> SyncResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "POST");

        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await?;

        decode(check_status(response).await?).await
    }
}

#[async_trait]
impl CrmClient for HubspotClient {
    async fn search_meetings(
        &self,
        access_token: &str,
        request: &SearchRequest,
    ) -> SyncResult<SearchPage> {
        self.post_json(access_token, SEARCH_PATH, request).await
    }

    async fn meeting_contacts(
        &self,
        access_token: &str,
        request: &BatchReadRequest,
    ) -> SyncResult<BatchResponse<AssociationResult>> {
        self.post_json(access_token, ASSOCIATIONS_PATH, request).await
    }

    async fn read_contacts(
        &self,
        access_token: &str,
        request: &BatchReadRequest,
    ) -> SyncResult<BatchResponse<CrmObject>> {
        self.post_json(access_token, CONTACTS_PATH, request).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> SyncResult<TokenGrant> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(SyncError::InvalidConfig(
                "client_id and client_secret are required to refresh tokens".into(),
            ));
        }

        let form = RefreshRequest::new(&self.client_id, &self.client_secret, refresh_token);
        let response = self
            .http
            .post(self.endpoint(TOKEN_PATH)?)
            .form(&form)
            .send()
            .await?;

        decode(check_status(response).await?).await
    }
}

// =============================================================================
// Response Handling
// =============================================================================

/// Turns a non-success status into the matching error.
async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    } else {
        None
    };

    let mut body = response.text().await.unwrap_or_default();
    truncate_body(&mut body);

    Err(SyncError::from_status(status.as_u16(), body, retry_after))
}

async fn decode<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| SyncError::DeserializationFailed(e.to_string()))
}

fn truncate_body(body: &mut String) {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
}
