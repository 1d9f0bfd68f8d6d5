//! # Sync Configuration
//!
//! Configuration management for the sync engine and worker.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PULSE_HUBSPOT_CLIENT_ID=...                                        │
//! │     PULSE_HUBSPOT_CLIENT_SECRET=...                                    │
//! │     PULSE_PAGE_SIZE=100                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pulse/pulse.toml (Linux)                                 │
//! │     ~/Library/Application Support/io.pulse.pulse/pulse.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5 attempts, 5000 ms base delay, 100 records per page               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # pulse.toml
//! [hubspot]
//! api_base = "https://api.hubapi.com"
//! client_id = "..."
//! request_timeout_secs = 30
//!
//! [engine]
//! max_attempts = 5
//! base_delay_ms = 5000
//! page_size = 100
//! max_offset = 9900
//! batch_participant_lookups = false
//! pass_timeout_secs = 900
//!
//! [database]
//! path = "/var/lib/pulse/pulse.db"
//!
//! [[accounts]]
//! account_id = "4821337"
//! refresh_token = "..."
//! ```

use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use pulse_core::{DEFAULT_PAGE_SIZE, MAX_OFFSET};

/// Search endpoint ceiling on `limit`.
const MAX_PAGE_SIZE: u32 = 200;

// =============================================================================
// HubSpot Settings
// =============================================================================

/// CRM API access.
#[derive(Debug, Clone, Deserialize)]
pub struct HubspotSettings {
    /// Base URL every endpoint path is joined onto.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// OAuth app client id.
    #[serde(default)]
    pub client_id: String,

    /// OAuth app client secret.
    #[serde(default)]
    pub client_secret: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.hubapi.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for HubspotSettings {
    fn default() -> Self {
        HubspotSettings {
            api_base: default_api_base(),
            client_id: String::new(),
            client_secret: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl HubspotSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Engine Settings
// =============================================================================

/// Pass behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Total tries per remote call, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential delay (milliseconds). Retry `n` waits
    /// `base_delay_ms * 2^n`.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Records requested per search page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Offset at which the pager rewinds instead of following `after`.
    #[serde(default = "default_max_offset")]
    pub max_offset: u64,

    /// Resolve participants once per page instead of once per record.
    #[serde(default)]
    pub batch_participant_lookups: bool,

    /// Deadline for one account's pass (seconds). 0 disables it.
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay() -> u64 {
    5000
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_max_offset() -> u64 {
    MAX_OFFSET
}
fn default_pass_timeout() -> u64 {
    900
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            page_size: default_page_size(),
            max_offset: default_max_offset(),
            batch_participant_lookups: false,
            pass_timeout_secs: default_pass_timeout(),
        }
    }
}

impl EngineSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn pass_timeout(&self) -> Option<Duration> {
        (self.pass_timeout_secs > 0).then(|| Duration::from_secs(self.pass_timeout_secs))
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. `:memory:` keeps everything in process.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("io", "pulse", "pulse")
        .map(|dirs| dirs.data_dir().join("pulse.db"))
        .unwrap_or_else(|| PathBuf::from("pulse.db"))
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
        }
    }
}

// =============================================================================
// Account Seeds
// =============================================================================

/// An account to register on startup if the database doesn't know it yet.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountSeed {
    pub account_id: String,

    #[serde(default)]
    pub refresh_token: String,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub hubspot: HubspotSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
}

impl SyncConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (pulse.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let base = url::Url::parse(&self.hubspot.api_base)?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "API base must be http:// or https://, got: {}",
                self.hubspot.api_base
            )));
        }

        if self.engine.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.engine.page_size == 0 || self.engine.page_size > MAX_PAGE_SIZE {
            return Err(SyncError::InvalidConfig(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if self.engine.max_offset < u64::from(self.engine.page_size) {
            return Err(SyncError::InvalidConfig(
                "max_offset must be at least page_size".into(),
            ));
        }

        if self.hubspot.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.accounts.iter().any(|a| a.account_id.is_empty()) {
            return Err(SyncError::InvalidConfig(
                "account seeds need a non-empty account_id".into(),
            ));
        }

        Ok(())
    }

    /// Returns true when refresh calls can be made.
    pub fn has_oauth_app(&self) -> bool {
        !self.hubspot.client_id.is_empty() && !self.hubspot.client_secret.is_empty()
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("PULSE_HUBSPOT_CLIENT_ID") {
            debug!("Overriding client id from environment");
            self.hubspot.client_id = id;
        }

        if let Ok(secret) = std::env::var("PULSE_HUBSPOT_CLIENT_SECRET") {
            self.hubspot.client_secret = secret;
        }

        if let Ok(base) = std::env::var("PULSE_API_BASE") {
            debug!(api_base = %base, "Overriding API base from environment");
            self.hubspot.api_base = base;
        }

        if let Ok(path) = std::env::var("PULSE_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        override_parsed("PULSE_MAX_ATTEMPTS", &mut self.engine.max_attempts);
        override_parsed("PULSE_BASE_DELAY_MS", &mut self.engine.base_delay_ms);
        override_parsed("PULSE_PAGE_SIZE", &mut self.engine.page_size);
        override_parsed("PULSE_PASS_TIMEOUT_SECS", &mut self.engine.pass_timeout_secs);
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "pulse", "pulse")
            .map(|dirs| dirs.config_dir().join("pulse.toml"))
    }
}

fn override_parsed<T: FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<T>() {
            Ok(value) => {
                debug!(var, "Overriding setting from environment");
                *target = value;
            }
            Err(_) => warn!(var, value = %raw, "Ignoring unparsable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.engine.base_delay(), Duration::from_millis(5000));
        assert_eq!(config.engine.page_size, 100);
        assert_eq!(config.engine.max_offset, 9900);
        assert!(!config.engine.batch_participant_lookups);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.engine.page_size = 0;
        assert!(config.validate().is_err());

        config.engine.page_size = 100;
        config.engine.max_attempts = 0;
        assert!(config.validate().is_err());

        config.engine.max_attempts = 3;
        config.hubspot.api_base = "ftp://example.com".into();
        assert!(config.validate().is_err());

        config.hubspot.api_base = "not a url".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.hubspot.api_base = "http://localhost:8080".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_parsing() {
        let config: SyncConfig = toml::from_str(
            r#"
            [hubspot]
            client_id = "cid"
            client_secret = "shh"

            [engine]
            base_delay_ms = 10
            batch_participant_lookups = true

            [[accounts]]
            account_id = "42"
            refresh_token = "rt"
            "#,
        )
        .unwrap();

        assert!(config.has_oauth_app());
        assert_eq!(config.engine.base_delay_ms, 10);
        assert_eq!(config.engine.max_attempts, 5);
        assert!(config.engine.batch_participant_lookups);
        assert_eq!(config.accounts[0].refresh_token, "rt");
    }

    #[test]
    fn test_pass_timeout_zero_disables() {
        let mut engine = EngineSettings::default();
        assert_eq!(engine.pass_timeout(), Some(Duration::from_secs(900)));
        engine.pass_timeout_secs = 0;
        assert_eq!(engine.pass_timeout(), None);
    }
}
