//! Lead submission and the recipient's workflow.

use super::auth::AccountId;
use super::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use beacon_ledger::leads::LeadList;
use beacon_ledger::{Lead, LeadFilter, LeadStatus, NewLead, SubmittedLead};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: LeadStatus,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NoteInput {
    pub note: String,
}

/// Public lead form. No identity required.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewLead>,
) -> Result<(StatusCode, Json<SubmittedLead>), ApiError> {
    let submitted = state.ledger.leads().submit(input).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

pub async fn mine(
    State(state): State<Arc<AppState>>,
    AccountId(recipient): AccountId,
    Query(filter): Query<LeadFilter>,
) -> Result<Json<LeadList>, ApiError> {
    Ok(Json(state.ledger.leads().list(recipient, filter).await?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    AccountId(actor): AccountId,
    Path(id): Path<Uuid>,
) -> Result<Json<Lead>, ApiError> {
    Ok(Json(state.ledger.leads().get(actor, id).await?))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    AccountId(actor): AccountId,
    Path(id): Path<Uuid>,
    Json(change): Json<StatusChange>,
) -> Result<Json<Lead>, ApiError> {
    let lead = state
        .ledger
        .leads()
        .update_status(actor, id, change.status, change.note)
        .await?;
    Ok(Json(lead))
}

pub async fn qualify(
    State(state): State<Arc<AppState>>,
    AccountId(actor): AccountId,
    Path(id): Path<Uuid>,
) -> Result<Json<Lead>, ApiError> {
    Ok(Json(state.ledger.leads().mark_qualified(actor, id).await?))
}

pub async fn add_note(
    State(state): State<Arc<AppState>>,
    AccountId(actor): AccountId,
    Path(id): Path<Uuid>,
    Json(input): Json<NoteInput>,
) -> Result<Json<Lead>, ApiError> {
    Ok(Json(state.ledger.leads().add_note(actor, id, &input.note).await?))
}
