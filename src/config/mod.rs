//! Configuration: schema, file loading, and validation.

pub mod loader;
pub mod schema;

pub use loader::{load_config, validate_config, ConfigError};
pub use schema::{AppConfig, ListenerConfig, RedisConfig, TlsConfig};
