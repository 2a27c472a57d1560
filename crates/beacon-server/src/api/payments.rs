//! Payment processor notifications.

use super::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use beacon_ledger::{PaymentNotification, PaymentOutcome};
use std::sync::Arc;
use tracing::debug;

/// Apply a notification. Replays answer `200` with `duplicate` set.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Json(notification): Json<PaymentNotification>,
) -> Result<Json<PaymentOutcome>, ApiError> {
    debug!(transaction = %notification.transaction_id, "Payment notification");
    let outcome = state.ledger.accounts().apply_payment(notification).await?;
    Ok(Json(outcome))
}
