//! # beacon-server
//!
//! HTTP and WebSocket front end for Beacon: pulse fan-out over WebSockets,
//! and the campaign, shipment, lead, and payment APIs over HTTP.

pub mod api;
pub mod config;
pub mod metrics;
pub mod middleware;
pub mod state;
pub mod ws;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub use config::Config;
pub use state::AppState;

/// Build the application router.
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.limits.max_body_bytes;

    let api = api::routes().route_layer(axum::middleware::from_fn_with_state(
        Arc::clone(&state),
        middleware::enforce_rate_limit,
    ));

    Router::new()
        .nest("/api", api)
        .route(&state.config.transport.websocket_path, get(ws::ws_handler))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP/WebSocket server until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config));

    // Start metrics server if enabled
    if state.config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(state.config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper = state::spawn_sweeper(Arc::clone(&state), stop_rx);

    let listener = TcpListener::bind(addr).await?;
    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    let draining = Arc::clone(&state);
    let service = app(Arc::clone(&state)).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down, rejecting new connections");
            draining.router.begin_drain();
        })
        .await?;

    let _ = stop_tx.send(true);
    if let Err(e) = sweeper.await {
        error!(error = %e, "Retention sweeper failed");
    }
    info!("Beacon server stopped");
    Ok(())
}
