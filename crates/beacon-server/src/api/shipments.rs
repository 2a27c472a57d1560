//! Content units (shipments).

use super::auth::AccountId;
use super::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use beacon_ledger::shipments::OwnedContent;
use beacon_ledger::store::ContentQuery;
use beacon_ledger::{Category, ContentUnit, ContentUpdate, NewContent, ShipmentStatus};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Query string of the public listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub category: Option<Category>,
    pub country: Option<String>,
    pub status: Option<ShipmentStatus>,
    pub limit: Option<usize>,
}

impl From<ListParams> for ContentQuery {
    fn from(p: ListParams) -> Self {
        ContentQuery {
            category: p.category,
            country: p.country,
            status: p.status,
            limit: p.limit,
            ..ContentQuery::default()
        }
    }
}

/// Active shipments, newest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ContentUnit>>, ApiError> {
    Ok(Json(state.ledger.shipments().list(params.into()).await?))
}

pub async fn mine(
    State(state): State<Arc<AppState>>,
    AccountId(owner): AccountId,
) -> Result<Json<OwnedContent>, ApiError> {
    Ok(Json(state.ledger.shipments().list_owned(owner).await?))
}

/// A single shipment. Counts as a view.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContentUnit>, ApiError> {
    Ok(Json(state.ledger.shipments().view(id).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    AccountId(owner): AccountId,
    Json(input): Json<NewContent>,
) -> Result<(StatusCode, Json<ContentUnit>), ApiError> {
    let unit = state.ledger.shipments().create(owner, input).await?;
    Ok((StatusCode::CREATED, Json(unit)))
}

/// Owner edit. A progress change is announced to the shipment rooms.
pub async fn update(
    State(state): State<Arc<AppState>>,
    AccountId(actor): AccountId,
    Path(id): Path<Uuid>,
    Json(update): Json<ContentUpdate>,
) -> Result<Json<ContentUnit>, ApiError> {
    let moved = update.progress.is_some();
    let unit = state.ledger.shipments().update(actor, id, update).await?;

    if moved {
        let recipients = state.publish_progress(&unit.id.to_string(), unit.progress);
        debug!(shipment = %unit.id, progress = unit.progress, recipients, "Progress published");
    }
    Ok(Json(unit))
}

pub async fn deactivate(
    State(state): State<Arc<AppState>>,
    AccountId(actor): AccountId,
    Path(id): Path<Uuid>,
) -> Result<Json<ContentUnit>, ApiError> {
    Ok(Json(state.ledger.shipments().deactivate(actor, id).await?))
}
