//! # Pulse Worker
//!
//! Runs one incremental meeting pass for every enabled account and exits.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Pulse Worker                                     │
//! │                                                                         │
//! │  1. tracing (RUST_LOG, default info)                                   │
//! │  2. SyncConfig: defaults → pulse.toml → PULSE_* env → validate         │
//! │  3. SQLite: open, migrate, register [[accounts]] seeds                 │
//! │  4. CredentialStore ◄── enabled accounts                               │
//! │  5. SyncRunner::run_all   (Ctrl+C cancels every pass)                  │
//! │  6. write refreshed tokens back, exit 1 if any pass failed             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `pulse-worker [CONFIG_PATH]`. Without an argument the path comes
//! from `PULSE_CONFIG` or the platform config directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pulse_core::from_millis;
use pulse_db::{Account, Database, DbConfig, DbError};
use pulse_sync::{
    AccountCredentials, AccountSeed, Credential, CredentialStore, HubspotClient, OutboxQueue,
    SqliteCheckpointStore, SyncConfig, SyncEngine, SyncRunner,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Pulse worker...");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("PULSE_CONFIG").map(PathBuf::from));
    let config = SyncConfig::load(config_path).context("Failed to load configuration")?;
    info!(
        api_base = %config.hubspot.api_base,
        database = ?config.database.path,
        max_attempts = config.engine.max_attempts,
        page_size = config.engine.page_size,
        "Configuration loaded"
    );

    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = Database::new(DbConfig::new(&config.database.path))
        .await
        .context("Failed to open database")?;

    seed_accounts(&db, &config.accounts).await?;

    let credentials = load_credentials(&db).await?;
    let accounts = credentials.all().await;
    if accounts.is_empty() {
        warn!("No enabled accounts, nothing to sync");
        db.close().await;
        return Ok(());
    }
    if !config.has_oauth_app() {
        warn!("No OAuth client configured, expired tokens cannot be refreshed");
    }

    let client = Arc::new(HubspotClient::new(&config.hubspot)?);
    let engine = Arc::new(SyncEngine::new(
        client,
        Arc::new(SqliteCheckpointStore::new(db.clone())),
        Arc::new(OutboxQueue::new(db.clone())),
        config.engine.clone(),
    ));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    let outcomes = SyncRunner::new(engine).run_all(accounts.clone(), &cancel).await;

    persist_tokens(&db, &accounts).await;
    let pending = db.events().count_pending().await.unwrap_or_default();
    db.close().await;

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.account_id.as_str())
        .collect();

    info!(
        accounts = outcomes.len(),
        failed = failed.len(),
        pending_events = pending,
        "Worker finished"
    );

    if !failed.is_empty() {
        bail!("sync failed for account(s): {}", failed.join(", "));
    }
    Ok(())
}

/// Registers configured accounts the database doesn't know yet.
///
/// A seeded account has no access token and an expired credential, so its
/// first remote call triggers a refresh.
async fn seed_accounts(db: &Database, seeds: &[AccountSeed]) -> anyhow::Result<()> {
    let repo = db.accounts();
    for seed in seeds {
        match repo.get(&seed.account_id).await {
            Ok(_) => {}
            Err(DbError::NotFound { .. }) => {
                repo.upsert(&Account {
                    account_id: seed.account_id.clone(),
                    access_token: String::new(),
                    refresh_token: seed.refresh_token.clone(),
                    expires_at: from_millis(0)?,
                    enabled: true,
                })
                .await?;
                info!(account_id = %seed.account_id, "Registered account from config");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn load_credentials(db: &Database) -> anyhow::Result<CredentialStore> {
    let store = CredentialStore::new();
    for account in db.accounts().list_enabled().await? {
        store
            .insert(
                account.account_id,
                Credential {
                    access_token: account.access_token,
                    refresh_token: account.refresh_token,
                    expires_at: account.expires_at,
                },
            )
            .await;
    }
    Ok(store)
}

/// Writes every credential back so refreshed tokens survive the run.
async fn persist_tokens(db: &Database, accounts: &[Arc<AccountCredentials>]) {
    let repo = db.accounts();
    for account in accounts {
        let credential = account.snapshot().await;
        if let Err(e) = repo
            .update_tokens(
                account.account_id(),
                &credential.access_token,
                &credential.refresh_token,
                credential.expires_at,
            )
            .await
        {
            error!(account_id = %account.account_id(), error = %e, "Failed to persist tokens");
        }
    }
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            warn!("Shutdown requested, cancelling passes");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}
