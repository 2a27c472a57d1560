//! Account registration and lookup.

use super::auth::AccountId;
use super::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use beacon_core::Violations;
use beacon_ledger::{Account, NewAccount, PlanTier, Role};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Self-service registration.
///
/// Plans and credits only change through payment notifications, and admin
/// accounts are never self-registered.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(mut input): Json<NewAccount>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    if input.role == Role::Admin {
        return Err(Violations::single("role", "must be wholesaler or seller").into());
    }
    input.plan = PlanTier::Free;
    input.ad_credits = Decimal::ZERO;

    let account = state.ledger.accounts().open(input).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// The caller's own account.
pub async fn me(
    State(state): State<Arc<AppState>>,
    AccountId(id): AccountId,
) -> Result<Json<Account>, ApiError> {
    Ok(Json(state.ledger.accounts().get(id).await?))
}
