//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from a TOML file;
//! defaults mirror a bare local deployment.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind addresses, TLS).
    pub listener: ListenerConfig,

    /// Backing store settings.
    pub redis: RedisConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address serving both protocols through the multiplexer
    /// (e.g. "0.0.0.0:8089").
    pub bind_address: String,

    /// When set, RPC gets its own listener here and `bind_address`
    /// serves HTTP only, with no multiplexing.
    pub rpc_address: Option<String>,

    /// Optional TLS termination, applied to every listener.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8089".to_string(),
            rpc_address: None,
            tls: None,
        }
    }
}

/// TLS configuration for the listeners.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Backing store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,

    /// Maximum concurrent store operations; waiting pops each hold one.
    pub max_active: usize,

    /// Deployment-wide key prefix; every list and wake channel lives
    /// under `prefix:key`.
    pub prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_active: 100,
            prefix: "hookqueue".to_string(),
        }
    }
}
