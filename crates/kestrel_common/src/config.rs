//! Server configuration, loadable from TOML.

use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KestrelConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:20210".
    pub listen_addr: String,
    /// Maximum concurrent connections (0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,
    /// Graceful shutdown drain timeout in seconds.
    #[serde(default = "default_shutdown_drain_timeout_secs")]
    pub shutdown_drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:20210".into(),
            max_connections: 0,
            shutdown_drain_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum accepted body size for command and transaction requests.
    /// Oversized input is rejected before any decoding is attempted.
    pub command_body_cap_bytes: usize,
    /// Maximum accepted body size for file uploads.
    pub file_body_cap_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            command_body_cap_bytes: 1024 * 1024,
            file_body_cap_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in seconds. Expired sessions are rejected and
    /// evicted on next lookup.
    pub expiry_secs: u64,
    /// Maximum live sessions (0 = unlimited).
    #[serde(default)]
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 1800,
            max_sessions: 0,
        }
    }
}

/// Initial administrator account, created at startup if absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub admin_user: String,
    /// In production this should come from an env var or secrets manager.
    pub admin_password: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            admin_user: "kestrel".into(),
            admin_password: String::new(),
        }
    }
}

fn default_shutdown_drain_timeout_secs() -> u64 {
    30
}

impl KestrelConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
