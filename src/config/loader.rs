//! Configuration loading and validation.
//!
//! Serde handles the syntax; `validate_config` handles semantics. A
//! config that fails validation is never accepted into the system.

use std::path::Path;
use thiserror::Error;

use crate::config::schema::AppConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.redis.prefix.is_empty() {
        return Err(ConfigError::Validation("redis.prefix is empty".into()));
    }
    if config.redis.max_active == 0 {
        return Err(ConfigError::Validation(
            "redis.max_active must be at least 1".into(),
        ));
    }
    if config.listener.bind_address.is_empty() {
        return Err(ConfigError::Validation(
            "listener.bind_address is empty".into(),
        ));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            return Err(ConfigError::Validation(
                "listener.tls requires both cert_path and key_path".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate_config(&AppConfig::default()).unwrap();
    }

    #[test]
    fn parses_a_full_config() {
        let config: AppConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "0.0.0.0:8443"
            rpc_address = "0.0.0.0:9443"

            [listener.tls]
            cert_path = "/etc/hookqueue/cert.pem"
            key_path = "/etc/hookqueue/key.pem"

            [redis]
            url = "redis://redis.internal:6379"
            max_active = 50
            prefix = "prod"
            "#,
        )
        .unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.redis.prefix, "prod");
        assert_eq!(config.listener.rpc_address.as_deref(), Some("0.0.0.0:9443"));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let mut config = AppConfig::default();
        config.redis.prefix.clear();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn zero_max_active_is_rejected() {
        let mut config = AppConfig::default();
        config.redis.max_active = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }
}
