//! s3lite -- a minimal S3-compatible object storage server.
//!
//! Crash-only design: every startup recovers from whatever is on disk. There
//! is no separate recovery mode. SIGTERM/SIGINT stop accepting connections
//! and let in-flight responses finish before exiting -- no other cleanup.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

/// Command-line arguments. Every flag is optional; running with none of them
/// falls back to the configuration file (if given) or the built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "s3lite", version, about = "Minimal S3-compatible object storage server")]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(long)]
    bind: Option<String>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<String>,

    /// Override the access key clients must present.
    #[arg(long)]
    access_key: Option<String>,

    /// Override the secret key used to verify request signatures.
    #[arg(long)]
    secret_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => s3lite::config::load_config(path)?,
        None => s3lite::config::Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    if let Some(bind) = &cli.bind {
        let (host, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--bind must be host:port"))?;
        config.host = host.to_string();
        config.port = port.parse()?;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(access_key) = cli.access_key {
        config.access_key = access_key;
    }
    if let Some(secret_key) = cli.secret_key {
        config.secret_key = secret_key;
    }

    let bind_addr = format!("{}:{}", config.host, config.port);

    info!(
        data_dir = %config.data_dir,
        access_key = %config.access_key,
        "crash-only startup: recovering from on-disk state"
    );

    let state = s3lite::AppState::new(config)?;
    let app = s3lite::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("s3lite listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("s3lite shut down");
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
            tracing::info!("received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        },
    }
}
