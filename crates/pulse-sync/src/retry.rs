//! # Backoff Retrier
//!
//! Runs one remote call up to `max_attempts` times, refreshing the account
//! credential when it has gone stale.
//!
//! ## Attempt Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  attempt 1 ──► ok ─────────────────────────────────────► return value  │
//! │      │                                                                  │
//! │      └─► err ──► not retryable? ───────────────────────► return err    │
//! │                    │                                                    │
//! │                    ├─► last attempt? ──────────────────► Exhausted     │
//! │                    │                                                    │
//! │                    ├─► credential expired or 401? ──► refresh (awaited)│
//! │                    │                                                    │
//! │                    └─► sleep max(base * 2^n, Retry-After)              │
//! │                          ──► attempt n+1                               │
//! │                                                                         │
//! │  Cancellation is checked before every attempt and races every call,    │
//! │  refresh and sleep.                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! With the default 5 attempts and 5 s base the delays are 10, 20, 40 and
//! 80 seconds. A rate-limited response stretches its delay to the
//! `Retry-After` the remote sent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::AccountCredentials;
use crate::client::CrmClient;
use crate::config::EngineSettings;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Retry Policy
// =============================================================================

/// Attempt budget and delay base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.max_attempts, settings.base_delay())
    }

    /// Delay schedule: `base * 2^n` for retry `n`, no jitter.
    pub fn schedule(&self) -> ExponentialBackoff {
        let first = self.base_delay.saturating_mul(2);
        let exponent = self.max_attempts.min(30);
        ExponentialBackoff {
            current_interval: first,
            initial_interval: first,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.base_delay.saturating_mul(1u32 << exponent),
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Retrier
// =============================================================================

/// Retry discipline of one account's pass.
pub struct Retrier {
    policy: RetryPolicy,
    client: Arc<dyn CrmClient>,
    credentials: Arc<AccountCredentials>,
    cancel: CancellationToken,
}

impl Retrier {
    pub fn new(
        policy: RetryPolicy,
        client: Arc<dyn CrmClient>,
        credentials: Arc<AccountCredentials>,
        cancel: CancellationToken,
    ) -> Self {
        Retrier {
            policy,
            client,
            credentials,
            cancel,
        }
    }

    /// Client the operations should call.
    pub fn client(&self) -> Arc<dyn CrmClient> {
        Arc::clone(&self.client)
    }

    pub fn credentials(&self) -> &AccountCredentials {
        &self.credentials
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `op` with the current access token until it succeeds, fails with
    /// a non-retryable error, or the attempt budget runs out.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut schedule = self.policy.schedule();
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            attempt += 1;

            let token = self.credentials.access_token().await;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                result = op(token.clone()) => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if attempt >= self.policy.max_attempts {
                warn!(
                    account_id = %self.credentials.account_id(),
                    operation,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(SyncError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }

            if err.is_auth() || self.credentials.is_expired_at(Utc::now()).await {
                self.refresh(&token).await?;
            }

            let backoff = schedule
                .next_backoff()
                .unwrap_or_else(|| self.policy.base_delay.saturating_mul(2));
            // a 429 names its own minimum wait
            let delay = err.retry_after().map_or(backoff, |wait| wait.max(backoff));
            warn!(
                account_id = %self.credentials.account_id(),
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Remote call failed, retrying"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Refreshes the credential. A failed refresh is logged and the next
    /// attempt runs with the old token.
    async fn refresh(&self, used_token: &str) -> SyncResult<()> {
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            outcome = self.credentials.refresh(self.client.as_ref(), used_token) => outcome,
        };

        match outcome {
            Ok(true) => debug!(account_id = %self.credentials.account_id(), "Retrying with refreshed credential"),
            Ok(false) => {}
            Err(e) => warn!(
                account_id = %self.credentials.account_id(),
                error = %e,
                "Credential refresh failed, continuing with current token"
            ),
        }
        Ok(())
    }
}
