//! LabStore -- S3-compatible object storage server.
//!
//! SIGTERM/SIGINT stop accepting connections and let in-flight requests
//! finish before exiting.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use labstore::config::{self, Config};
use labstore::iam::Iam;
use labstore::storage::local::LocalBackend;

/// Command-line arguments for the LabStore server.
#[derive(Parser, Debug)]
#[command(name = "labstore", version, about = "S3-compatible object storage server")]
struct Cli {
    /// Path to the YAML configuration file. Built-in defaults are used
    /// when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,

    /// Force debug logging.
    #[arg(long)]
    debug: bool,

    #[arg(long, env = "LS_HOST")]
    host: Option<String>,

    #[arg(long, env = "LS_PORT")]
    port: Option<u16>,

    #[arg(long, env = "LS_STORAGE_ROOT")]
    storage_root: Option<String>,

    #[arg(long, env = "LS_ADMIN_ACCESS_KEY")]
    admin_access_key: Option<String>,

    #[arg(long, env = "LS_ADMIN_SECRET_KEY", hide_env_values = true)]
    admin_secret_key: Option<String>,
}

impl Cli {
    /// Apply command-line and environment overrides on top of the file.
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(root) = &self.storage_root {
            config.storage.root_dir = root.clone();
        }
        if let Some(access_key) = &self.admin_access_key {
            config.auth.access_key = access_key.clone();
        }
        if let Some(secret_key) = &self.admin_secret_key {
            config.auth.secret_key = secret_key.clone();
        }
    }
}

/// Initialize tracing. `RUST_LOG` wins over the configured level, and
/// `--debug` wins over both.
fn init_logging(config: &Config, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => Config::default(),
    };
    cli.apply(&mut config);

    init_logging(&config, cli.debug);
    match &cli.config {
        Some(path) => info!("Loaded configuration from {}", path),
        None => info!("No configuration file given, using defaults"),
    }
    tracing::debug!(?config, "effective configuration");

    let bind_addr = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    let iam = Iam::from_config(&config.auth)?;
    info!(?iam, "identities loaded");

    let storage = LocalBackend::new(&config.storage.root_dir)
        .with_context(|| format!("creating storage root {}", config.storage.root_dir))?;

    if config.observability.metrics {
        labstore::metrics::init_metrics();
        info!("Prometheus metrics initialized");
    }

    let state = Arc::new(labstore::AppState {
        config,
        iam,
        storage: Arc::new(storage),
    });

    let app = labstore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!("LabStore listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("LabStore shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_file() {
        let cli = Cli::parse_from([
            "labstore",
            "--port",
            "9000",
            "--storage-root",
            "/tmp/ls",
            "--admin-access-key",
            "root",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.storage.root_dir, "/tmp/ls");
        assert_eq!(config.auth.access_key, "root");
        assert_eq!(config.auth.secret_key, "admin");
    }
}
