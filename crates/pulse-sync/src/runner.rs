//! # Sync Runner
//!
//! Runs one pass per account concurrently and collects the outcomes.
//!
//! ```text
//!   root token ──┬── child ──► task: pass(account a) ──► outcome a
//!                ├── child ──► task: pass(account b) ──► outcome b
//!                └── child ──► task: pass(account c) ──► outcome c
//!
//!   deadline hit → that child is cancelled, the pass unwinds as Cancelled
//!   root cancelled → every pass unwinds as Cancelled
//! ```
//!
//! A failing account never cancels the others.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::AccountCredentials;
use crate::engine::{PassReport, SyncEngine};
use crate::error::{SyncError, SyncResult};

/// Result of one account's pass.
#[derive(Debug)]
pub struct AccountOutcome {
    pub account_id: String,
    pub result: SyncResult<PassReport>,
}

impl AccountOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct SyncRunner {
    engine: Arc<SyncEngine>,
    pass_timeout: Option<Duration>,
}

impl SyncRunner {
    /// Runner using the engine's configured pass deadline.
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        let pass_timeout = engine.settings().pass_timeout();
        SyncRunner {
            engine,
            pass_timeout,
        }
    }

    pub fn with_pass_timeout(mut self, pass_timeout: Option<Duration>) -> Self {
        self.pass_timeout = pass_timeout;
        self
    }

    /// Runs every account once. Outcomes are ordered by account id.
    pub async fn run_all(
        &self,
        accounts: Vec<Arc<AccountCredentials>>,
        cancel: &CancellationToken,
    ) -> Vec<AccountOutcome> {
        info!(accounts = accounts.len(), "Starting sync passes");

        let mut pending: HashSet<String> = HashSet::new();
        let mut tasks: JoinSet<AccountOutcome> = JoinSet::new();

        for credentials in accounts {
            let account_id = credentials.account_id().to_string();
            pending.insert(account_id.clone());

            let engine = Arc::clone(&self.engine);
            let child = cancel.child_token();
            let pass_timeout = self.pass_timeout;

            tasks.spawn(async move {
                let result = run_with_deadline(&engine, credentials, child, pass_timeout).await;
                AccountOutcome { account_id, result }
            });
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    pending.remove(&outcome.account_id);
                    outcomes.push(outcome);
                }
                Err(e) => error!(error = %e, "Sync task failed"),
            }
        }

        // tasks that panicked left no outcome behind
        outcomes.extend(pending.into_iter().map(|account_id| AccountOutcome {
            account_id,
            result: Err(SyncError::Internal("sync task panicked".into())),
        }));
        outcomes.sort_by(|a, b| a.account_id.cmp(&b.account_id));

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(
            succeeded = outcomes.len() - failed,
            failed,
            "Sync passes finished"
        );
        outcomes
    }
}

async fn run_with_deadline(
    engine: &SyncEngine,
    credentials: Arc<AccountCredentials>,
    cancel: CancellationToken,
    pass_timeout: Option<Duration>,
) -> SyncResult<PassReport> {
    let Some(limit) = pass_timeout else {
        return engine.run_pass(credentials, cancel).await;
    };

    let account_id = credentials.account_id().to_string();
    let pass = engine.run_pass(credentials, cancel.clone());
    tokio::pin!(pass);

    tokio::select! {
        result = &mut pass => result,
        _ = tokio::time::sleep(limit) => {
            warn!(
                account_id = %account_id,
                timeout_secs = limit.as_secs(),
                "Pass deadline reached, cancelling"
            );
            cancel.cancel();
            pass.await
        }
    }
}
