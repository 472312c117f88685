//! tessera server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tessera_core::config::AppConfig;
use tessera_server::bootstrap::ensure_bootstrap_principals;
use tessera_server::{AppState, ExpiryReaper, create_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// tessera - a self-hosted image host with resumable chunked upload
#[derive(Parser, Debug)]
#[command(name = "tesserad")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TESSERA_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration: built-in defaults, then the TOML file if present,
/// then `TESSERA_` environment variables (`__` separates sections).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    // TESSERA_SERVER and TESSERA_TOKEN are the CLI's variables.
    let config: AppConfig = figment
        .merge(
            Env::prefixed("TESSERA_")
                .ignore(&["config", "server", "token"])
                .split("__"),
        )
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tessera v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    let storage = tessera_storage::from_config(&config.storage)
        .await
        .context("failed to initialize chunk storage")?;
    storage
        .health_check()
        .await
        .context("chunk storage health check failed")?;
    tracing::info!(
        backend = storage.backend_name(),
        temp_root = %config.storage.temp_root.display(),
        artifact_root = %config.storage.artifact_root.display(),
        "Chunk storage initialized"
    );

    let metadata = tessera_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    ensure_bootstrap_principals(metadata.as_ref(), &config.auth.bootstrap)
        .await
        .context("failed to provision bootstrap principals")?;

    let reaper = if config.reaper.enabled {
        let reaper = Arc::new(ExpiryReaper::new(
            storage.clone(),
            metadata.clone(),
            &config.reaper,
        ));
        tracing::info!(
            interval_secs = config.reaper.interval_secs,
            ttl_secs = config.reaper.session_ttl_secs,
            delete_orphan_rows = config.reaper.delete_orphan_rows,
            "Expiry reaper enabled"
        );
        Some(reaper.spawn(config.reaper.interval()))
    } else {
        tracing::info!("Expiry reaper disabled");
        None
    };

    let state = AppState::new(config.clone(), storage, metadata)
        .context("failed to build application state")?;
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(reaper) = reaper {
        if reaper.is_finished() {
            tracing::warn!("Expiry reaper exited before shutdown");
        }
        reaper.shutdown().await;
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config("/nonexistent/tessera.toml").unwrap();
        assert_eq!(config.server.chunk_size, tessera_core::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
chunk_size = 1048576
allowed_extensions = "png"

[reaper]
session_ttl_secs = 600
"#,
        )
        .unwrap();
        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.chunk_size, 1048576);
        assert_eq!(config.server.allowed_extensions(), vec!["png"]);
        assert_eq!(config.reaper.session_ttl_secs, 600);
        assert_eq!(config.reaper.interval_secs, 10800);
    }

    #[test]
    fn invalid_file_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "[server]\nchunk_size = 0\n").unwrap();
        assert!(load_config(path.to_str().unwrap()).is_err());
    }
}
