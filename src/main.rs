use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hookqueue::config::{load_config, validate_config, AppConfig, TlsConfig};
use hookqueue::queue::Queue;
use hookqueue::server::{Server, Shutdown};
use hookqueue::store::RedisStore;

#[derive(Parser)]
#[command(name = "hookqueue")]
#[command(about = "Durable per-key webhook relay queue", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file; flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address serving HTTP (and RPC when multiplexed).
    #[arg(long)]
    http_addr: Option<String>,

    /// Separate bind address for RPC; disables multiplexing.
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Redis connection URL.
    #[arg(long)]
    redis_url: Option<String>,

    /// Key prefix for this deployment.
    #[arg(long)]
    redis_prefix: Option<String>,

    /// Maximum concurrent store operations.
    #[arg(long)]
    max_active: Option<usize>,

    /// Path to the TLS certificate (PEM).
    #[arg(long)]
    tls_cert: Option<String>,

    /// Path to the TLS private key (PEM).
    #[arg(long)]
    tls_key: Option<String>,

    /// Serve plaintext. Without this flag a certificate and key are
    /// required.
    #[arg(long)]
    no_tls: bool,
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) -> Result<(), String> {
    if let Some(addr) = &cli.http_addr {
        config.listener.bind_address = addr.clone();
    }
    if let Some(addr) = &cli.rpc_addr {
        config.listener.rpc_address = Some(addr.clone());
    }
    if let Some(url) = &cli.redis_url {
        config.redis.url = url.clone();
    }
    if let Some(prefix) = &cli.redis_prefix {
        config.redis.prefix = prefix.clone();
    }
    if let Some(max_active) = cli.max_active {
        config.redis.max_active = max_active;
    }
    match (&cli.tls_cert, &cli.tls_key) {
        (Some(cert), Some(key)) => {
            config.listener.tls = Some(TlsConfig {
                cert_path: cert.clone(),
                key_path: key.clone(),
            });
        }
        (None, None) => {}
        _ => return Err("--tls-cert and --tls-key must be given together".into()),
    }
    if cli.no_tls {
        config.listener.tls = None;
    } else if config.listener.tls.is_none() {
        return Err("tls is required; pass --tls-cert/--tls-key or --no-tls".into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookqueue=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &cli)?;
    validate_config(&config)?;

    tracing::info!(
        redis_url = %config.redis.url,
        prefix = %config.redis.prefix,
        "connecting to store"
    );
    let store = RedisStore::connect(&config.redis.url, config.redis.max_active).await?;
    let queue = Arc::new(Queue::new(&config.redis.prefix, Arc::new(store))?);

    let server = Server::bind(&config.listener, queue).await?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        trigger.trigger();
    });

    server.run(shutdown).await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            tracing::warn!(error = %err, "sigterm handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli::parse_from(["hookqueue", "--no-tls"])
    }

    #[test]
    fn plaintext_requires_the_flag() {
        let cli = Cli::parse_from(["hookqueue"]);
        let mut config = AppConfig::default();
        assert!(apply_overrides(&mut config, &cli).is_err());
    }

    #[test]
    fn no_tls_clears_configured_tls() {
        let mut cli = bare_cli();
        cli.tls_cert = Some("cert.pem".into());
        cli.tls_key = Some("key.pem".into());
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli).unwrap();
        assert!(config.listener.tls.is_none());
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let mut cli = bare_cli();
        cli.tls_cert = Some("cert.pem".into());
        let mut config = AppConfig::default();
        assert!(apply_overrides(&mut config, &cli).is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let mut cli = bare_cli();
        cli.http_addr = Some("0.0.0.0:9000".into());
        cli.redis_prefix = Some("staging".into());
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:9000");
        assert_eq!(config.redis.prefix, "staging");
    }
}
