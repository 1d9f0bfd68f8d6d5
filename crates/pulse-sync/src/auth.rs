//! # Account Credentials
//!
//! Per-account OAuth state shared by every pass of that account.
//!
//! ## Refresh Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Credential Refresh                                 │
//! │                                                                         │
//! │  Pass A attempt fails (401)        Pass B attempt fails (401)          │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  refresh_lock.lock() ◄─────────── waits ─┘                             │
//! │       │                                                                 │
//! │       │  token still the one A used?  yes → POST /oauth/v1/token       │
//! │       │                                      write new credential      │
//! │       ▼                                                                 │
//! │  unlock ─────────────────────────► B: token changed since B used it?   │
//! │                                       yes → skip, reuse A's refresh    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Readers never block on a refresh in flight for longer than the final
//! write of the new credential.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::client::CrmClient;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Credential
// =============================================================================

/// OAuth token pair of one account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Returns true once `now` is past the expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Account Credentials
// =============================================================================

/// Credential of one account plus the lock that serializes its refreshes.
#[derive(Debug)]
pub struct AccountCredentials {
    account_id: String,
    credential: RwLock<Credential>,
    refresh_lock: Mutex<()>,
}

impl AccountCredentials {
    pub fn new(account_id: impl Into<String>, credential: Credential) -> Self {
        AccountCredentials {
            account_id: account_id.into(),
            credential: RwLock::new(credential),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Current access token.
    pub async fn access_token(&self) -> String {
        self.credential.read().await.access_token.clone()
    }

    /// Copy of the current credential.
    pub async fn snapshot(&self) -> Credential {
        self.credential.read().await.clone()
    }

    pub async fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.credential.read().await.is_expired_at(now)
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// `used_token` is the access token the failed call ran with. If another
    /// task already replaced it, no request is made and `Ok(false)` is
    /// returned.
    pub async fn refresh(&self, client: &dyn CrmClient, used_token: &str) -> SyncResult<bool> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let current = self.credential.read().await;
            if current.access_token != used_token {
                debug!(account_id = %self.account_id, "Credential already refreshed");
                return Ok(false);
            }
            current.refresh_token.clone()
        };

        let grant = client
            .refresh_token(&refresh_token)
            .await
            .map_err(|e| SyncError::RefreshFailed {
                account_id: self.account_id.clone(),
                reason: e.to_string(),
            })?;

        let expires_at = Duration::try_seconds(grant.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| SyncError::RefreshFailed {
                account_id: self.account_id.clone(),
                reason: format!("token lifetime out of range: {}s", grant.expires_in),
            })?;
        {
            let mut current = self.credential.write().await;
            current.access_token = grant.access_token;
            if let Some(rotated) = grant.refresh_token {
                current.refresh_token = rotated;
            }
            current.expires_at = expires_at;
        }

        info!(
            account_id = %self.account_id,
            expires_at = %expires_at,
            "Credential refreshed"
        );
        Ok(true)
    }
}

// =============================================================================
// Credential Store
// =============================================================================

/// Registry of every account's credentials.
#[derive(Debug, Default)]
pub struct CredentialStore {
    accounts: RwLock<HashMap<String, Arc<AccountCredentials>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account, replacing any previous entry.
    pub async fn insert(
        &self,
        account_id: impl Into<String>,
        credential: Credential,
    ) -> Arc<AccountCredentials> {
        let account_id = account_id.into();
        let entry = Arc::new(AccountCredentials::new(account_id.clone(), credential));
        self.accounts
            .write()
            .await
            .insert(account_id, Arc::clone(&entry));
        entry
    }

    pub async fn get(&self, account_id: &str) -> SyncResult<Arc<AccountCredentials>> {
        self.accounts
            .read()
            .await
            .get(account_id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownAccount(account_id.to_string()))
    }

    /// Every registered account, ordered by id.
    pub async fn all(&self) -> Vec<Arc<AccountCredentials>> {
        let mut all: Vec<_> = self.accounts.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.account_id().cmp(b.account_id()));
        all
    }
}
