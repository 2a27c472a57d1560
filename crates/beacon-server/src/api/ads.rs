//! Campaign management and metering.

use super::auth::AccountId;
use super::error::ApiError;
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use beacon_ledger::metering::OwnedCampaigns;
use beacon_ledger::{
    AdFilter, CampaignUpdate, CampaignView, MeterOutcome, MeterRequest, NewCampaign,
    ReviewDecision,
};
use std::sync::Arc;
use uuid::Uuid;

/// Campaigns eligible to be shown for a category and country.
pub async fn matching(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AdFilter>,
) -> Result<Json<Vec<CampaignView>>, ApiError> {
    let campaigns = state.ledger.metering().find_eligible(&filter).await?;
    Ok(Json(campaigns.into_iter().map(CampaignView::from).collect()))
}

/// The caller's campaigns with totals.
pub async fn mine(
    State(state): State<Arc<AppState>>,
    AccountId(owner): AccountId,
) -> Result<Json<OwnedCampaigns>, ApiError> {
    Ok(Json(state.ledger.metering().list_owned(owner).await?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignView>, ApiError> {
    let campaign = state.ledger.metering().get_campaign(id).await?;
    Ok(Json(campaign.into()))
}

/// Create a campaign funded from the caller's credits.
pub async fn create(
    State(state): State<Arc<AppState>>,
    AccountId(owner): AccountId,
    Json(input): Json<NewCampaign>,
) -> Result<(StatusCode, Json<CampaignView>), ApiError> {
    let campaign = state.ledger.metering().create_campaign(owner, input).await?;
    Ok((StatusCode::CREATED, Json(campaign.into())))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    AccountId(actor): AccountId,
    Path(id): Path<Uuid>,
    Json(update): Json<CampaignUpdate>,
) -> Result<Json<CampaignView>, ApiError> {
    let campaign = state
        .ledger
        .metering()
        .update_campaign(actor, id, update)
        .await?;
    Ok(Json(campaign.into()))
}

/// Cancel a campaign and refund what is left of its budget.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    AccountId(actor): AccountId,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignView>, ApiError> {
    let campaign = state.ledger.metering().cancel_campaign(actor, id).await?;
    Ok(Json(campaign.into()))
}

/// Admin approval or rejection.
pub async fn review(
    State(state): State<Arc<AppState>>,
    AccountId(reviewer): AccountId,
    Path(id): Path<Uuid>,
    Json(decision): Json<ReviewDecision>,
) -> Result<Json<CampaignView>, ApiError> {
    let campaign = state
        .ledger
        .metering()
        .review_campaign(reviewer, id, decision)
        .await?;
    Ok(Json(campaign.into()))
}

pub async fn impression(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<MeterRequest>>,
) -> Result<Json<MeterOutcome>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let outcome = state
        .ledger
        .metering()
        .record_impression(id, request)
        .await?;
    record(&outcome, "impression");
    Ok(Json(outcome))
}

pub async fn click(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<MeterRequest>>,
) -> Result<Json<MeterOutcome>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let outcome = state.ledger.metering().record_click(id, request).await?;
    record(&outcome, "click");
    Ok(Json(outcome))
}

fn record(outcome: &MeterOutcome, event: &'static str) {
    if !outcome.duplicate {
        let credited = outcome.allocation.as_ref().map(|a| a.credited);
        metrics::record_ad_event(event, outcome.charged, credited);
    }
}
