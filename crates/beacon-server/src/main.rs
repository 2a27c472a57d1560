//! # Beacon Server
//!
//! Realtime pulse broadcasting and ad monetization server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with a specific config file
//! beacon --config /path/to/beacon.toml
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 beacon
//! ```

use anyhow::{bail, Result};
use beacon_server::{metrics, run_server, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    metrics::init_metrics();
    run_server(config, shutdown_signal()).await?;

    Ok(())
}

fn load_config() -> Result<Config> {
    let mut args = std::env::args().skip(1);
    match (args.next().as_deref(), args.next()) {
        (None, _) => Config::load(),
        (Some("--config"), Some(path)) => Config::from_file(shellexpand::tilde(&path).as_ref()),
        (Some(other), _) => bail!("unexpected argument: {other} (usage: beacon [--config <path>])"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Received shutdown signal");
}
