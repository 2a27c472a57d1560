//! HTTP API.

pub mod accounts;
pub mod ads;
pub mod auth;
pub mod error;
pub mod health;
pub mod leads;
pub mod payments;
pub mod shipments;

use crate::state::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;

/// Routes mounted under `/api`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health))
        .route("/stats", get(health::stats))
        .route("/accounts", post(accounts::create))
        .route("/accounts/me", get(accounts::me))
        .route("/ads", post(ads::create))
        .route("/ads/match", get(ads::matching))
        .route("/ads/my", get(ads::mine))
        .route(
            "/ads/:id",
            get(ads::get).put(ads::update).delete(ads::cancel),
        )
        .route("/ads/:id/review", post(ads::review))
        .route("/ads/:id/impression", post(ads::impression))
        .route("/ads/:id/click", post(ads::click))
        .route("/shipments", get(shipments::list).post(shipments::create))
        .route("/shipments/my", get(shipments::mine))
        .route(
            "/shipments/:id",
            get(shipments::get)
                .put(shipments::update)
                .delete(shipments::deactivate),
        )
        .route("/leads", post(leads::submit))
        .route("/leads/my", get(leads::mine))
        .route("/leads/:id", get(leads::get))
        .route("/leads/:id/status", put(leads::update_status))
        .route("/leads/:id/qualify", post(leads::qualify))
        .route("/leads/:id/notes", post(leads::add_note))
        .route("/payments/webhook", post(payments::webhook))
}
