//! Liveness and platform totals.

use super::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use beacon_core::now_millis;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Health check handler.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.router.connection_count(),
        "draining": state.router.registry().is_draining(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub connections: usize,
    pub rooms: usize,
    pub subscriptions: usize,
    pub dropped_deliveries: u64,
    /// Pulses stored within the retention window.
    pub recent_pulses: usize,
    pub accounts: usize,
    pub active_shipments: usize,
    pub active_campaigns: usize,
}

/// Platform totals.
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Stats>, ApiError> {
    let router = state.router.stats();
    let counts = state.ledger.counts().await?;
    let since = state.pulses.horizon(now_millis());

    Ok(Json(Stats {
        connections: router.connection_count,
        rooms: router.room_count,
        subscriptions: router.total_subscriptions,
        dropped_deliveries: router.dropped_deliveries,
        recent_pulses: state.pulses.count_since(since),
        accounts: counts.accounts,
        active_shipments: counts.active_content,
        active_campaigns: counts.active_campaigns,
    }))
}
