use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

// =============================================================================
// File config (figment-deserialized from defaults / grid.toml / env vars)
// =============================================================================
//
//   grid.toml:     [stream]
//                  heartbeat_secs = 30
//
//   env var:       GRID_STREAM__HEARTBEAT_SECS=30   (double underscore = nesting)

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub db_name: String,
    #[serde(default)]
    pub stream: StreamFileConfig,
    #[serde(default)]
    pub ledger: LedgerFileConfig,
    #[serde(default)]
    pub edits: EditsFileConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            db_name: String::new(),
            stream: StreamFileConfig::default(),
            ledger: LedgerFileConfig::default(),
            edits: EditsFileConfig::default(),
        }
    }
}

/// Push stream timers (lives under `[stream]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamFileConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_check_ms: u64,
    /// Requests older than this are marked timed out by the sweep.
    #[serde(default = "default_timeout_ms")]
    pub timeout_threshold_ms: u64,
}

impl Default for StreamFileConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            timeout_check_ms: default_timeout_ms(),
            timeout_threshold_ms: default_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerFileConfig {
    #[serde(default = "default_ledger_capacity")]
    pub capacity: usize,
}

impl Default for LedgerFileConfig {
    fn default() -> Self {
        Self {
            capacity: default_ledger_capacity(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EditsFileConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for EditsFileConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5173".to_string()
}
fn default_heartbeat_secs() -> u64 {
    60
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_ledger_capacity() -> usize {
    500
}
fn default_debounce_ms() -> u64 {
    500
}

/// Build a figment that layers: defaults → grid.toml in `dir` → GRID_* env vars.
pub fn load_config(dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(dir.join("grid.toml")))
        .merge(Env::prefixed("GRID_").split("__"))
}

// =============================================================================
// Runtime config
// =============================================================================

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub db_name: String,
    pub heartbeat_interval: Duration,
    pub timeout_check_interval: Duration,
    pub timeout_threshold: Duration,
    pub ledger_capacity: usize,
    pub debounce: Duration,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self, ConfigError> {
        if fc.ledger.capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "ledger.capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if fc.stream.heartbeat_secs == 0 || fc.stream.timeout_check_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "stream",
                reason: "timer intervals must be non-zero".to_string(),
            });
        }
        Ok(Self {
            base_url: fc.base_url.trim_end_matches('/').to_string(),
            db_name: fc.db_name.clone(),
            heartbeat_interval: Duration::from_secs(fc.stream.heartbeat_secs),
            timeout_check_interval: Duration::from_millis(fc.stream.timeout_check_ms),
            timeout_threshold: Duration::from_millis(fc.stream.timeout_threshold_ms),
            ledger_capacity: fc.ledger.capacity,
            debounce: Duration::from_millis(fc.edits.debounce_ms),
        })
    }

    /// Extract and validate from `dir`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let fc: FileConfig = load_config(dir).extract()?;
        Self::from_file(&fc)
    }

    pub fn for_tenant(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let fc = FileConfig::default();
        Self {
            base_url: fc.base_url,
            db_name: fc.db_name,
            heartbeat_interval: Duration::from_secs(fc.stream.heartbeat_secs),
            timeout_check_interval: Duration::from_millis(fc.stream.timeout_check_ms),
            timeout_threshold: Duration::from_millis(fc.stream.timeout_threshold_ms),
            ledger_capacity: fc.ledger.capacity,
            debounce: Duration::from_millis(fc.edits.debounce_ms),
        }
    }
}
