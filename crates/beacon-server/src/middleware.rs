//! HTTP middleware.

use crate::api::error::ApiError;
use crate::config::RateLimitConfig;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    started_at: Instant,
    count: usize,
}

/// Fixed-window request counter per client address.
///
/// Requests without a known peer address share one window.
#[derive(Debug)]
pub struct RateLimitState {
    enabled: bool,
    max_requests: usize,
    window: Duration,
    clients: DashMap<Option<IpAddr>, RateLimitWindow>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            enabled: true,
            max_requests,
            window,
            clients: DashMap::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(config.max_requests, Duration::from_secs(config.window_secs.max(1)))
        }
    }

    /// Count one request from `client`. Returns `false` once the client's
    /// window is used up.
    pub fn check(&self, client: Option<IpAddr>) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut window = self.clients.entry(client).or_insert(RateLimitWindow {
            started_at: now,
            count: 0,
        });
        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.count = 0;
        }
        if window.count >= self.max_requests {
            return false;
        }
        window.count += 1;
        true
    }

    /// Forget clients whose window has ended.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.clients.len();
        self.clients
            .retain(|_, w| now.duration_since(w.started_at) < self.window);
        before.saturating_sub(self.clients.len())
    }

    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

/// Reject requests over the per-client limit with `429 Too Many Requests`.
pub async fn enforce_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if !state.rate_limit.check(client) {
        debug!(client = ?client, path = %req.uri().path(), "Rate limited");
        return ApiError::RateLimited.into_response();
    }
    next.run(req).await
}
