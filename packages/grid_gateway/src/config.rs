use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::ConfigError;

// =============================================================================
// File config (figment-deserialized from defaults / gateway.toml / env vars)
// =============================================================================
//
//   gateway.toml:  [server]
//                  port = 8080
//
//   env var:       GRIDGW_SERVER__PORT=8080   (double underscore = nesting)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub broker: BrokerFileConfig,
    #[serde(default)]
    pub responder: ResponderFileConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// In-process broker sizing (lives under `[broker]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerFileConfig {
    /// Messages a queue holds before publishes are refused.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Frames buffered per push channel.
    #[serde(default = "default_reply_buffer")]
    pub reply_buffer: usize,
}

impl Default for BrokerFileConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            reply_buffer: default_reply_buffer(),
        }
    }
}

/// Built-in liveness responder (lives under `[responder]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponderFileConfig {
    #[serde(default = "default_responder_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tenants: Vec<String>,
}

impl Default for ResponderFileConfig {
    fn default() -> Self {
        Self {
            enabled: default_responder_enabled(),
            tenants: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5173
}
fn default_queue_capacity() -> usize {
    grid_broker::memory::DEFAULT_QUEUE_CAPACITY
}
fn default_reply_buffer() -> usize {
    grid_broker::bridge::DEFAULT_REPLY_BUFFER
}
fn default_responder_enabled() -> bool {
    true
}

/// Build a figment that layers: defaults → gateway.toml in `dir` → GRIDGW_* env vars.
pub fn load_config(dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(dir.join("gateway.toml")))
        .merge(Env::prefixed("GRIDGW_").split("__"))
}

// =============================================================================
// Runtime config
// =============================================================================

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub queue_capacity: usize,
    pub reply_buffer: usize,
    /// Tenants answered by the built-in liveness responder; empty when disabled.
    pub responder_tenants: Vec<String>,
}

impl GatewayConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self, ConfigError> {
        if fc.broker.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "broker.queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if fc.broker.reply_buffer == 0 {
            return Err(ConfigError::Invalid {
                key: "broker.reply_buffer",
                reason: "must be at least 1".to_string(),
            });
        }
        let responder_tenants = if fc.responder.enabled {
            fc.responder
                .tenants
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        } else {
            Vec::new()
        };
        Ok(Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            queue_capacity: fc.broker.queue_capacity,
            reply_buffer: fc.broker.reply_buffer,
            responder_tenants,
        })
    }

    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let fc: FileConfig = load_config(dir).extract()?;
        Self::from_file(&fc)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "server.host",
                reason: e.to_string(),
            })
    }
}
