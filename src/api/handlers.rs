use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::api::models::{
    BuySharesRequest, HealthResponse, PostUpdateRequest, ProjectResponse, TransitionRequest,
};
use crate::error::{AppError, AppResult};
use crate::ledger::LedgerClient;
use crate::projects::metadata::token_metadata;
use crate::projects::models::{Project, ProjectUpdate, ShareRecord};
use crate::projects::state_machine::ProjectStateMachine;
use crate::shares::ShareLedger;
use crate::store::ProjectStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProjectStore>,
    pub shares: Arc<ShareLedger>,
    pub machine: Arc<ProjectStateMachine>,
    pub ledger: Arc<dyn LedgerClient>,
    pub minter_wallet: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ProjectResponse>> {
    let project = require_project(&state, id).await?;
    let shares = state.store.shares_for_project(id).await?;
    let total_shares = state.shares.total_shares(id).await?;
    let gross_raised = state.shares.gross_raised(&project).await?;
    let updates = state.store.updates_for_project(id).await?;

    Ok(Json(ProjectResponse {
        shares_num: shares.len(),
        total_shares,
        gross_raised,
        shares,
        updates,
        project,
    }))
}

/// Settle a purchase receipt. Safe to retry: resubmitting the same
/// ophash returns the already-settled record.
pub async fn buy_shares(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<BuySharesRequest>,
) -> AppResult<Json<ShareRecord>> {
    let record = state
        .shares
        .record_purchase(id, &request.wallet, &request.ophash)
        .await?;
    Ok(Json(record))
}

pub async fn transition_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<TransitionRequest>,
) -> AppResult<Json<Project>> {
    let project = state
        .machine
        .transition(id, request.status, &request.acting_user)
        .await?;
    Ok(Json(project))
}

pub async fn project_metadata(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let project = require_project(&state, id).await?;
    Ok(Json(token_metadata(&project, &state.minter_wallet)))
}

/// Only the artist or the presenter may post updates; authorship is
/// proven by a signature over the update body.
pub async fn post_update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<PostUpdateRequest>,
) -> AppResult<Json<ProjectUpdate>> {
    let project = require_project(&state, id).await?;
    let is_author = request.author_wallet == project.artist_wallet
        || project.presenter_wallet.as_deref() == Some(request.author_wallet.as_str());
    if !is_author {
        return Err(AppError::Forbidden(
            "only the project artist or presenter can post updates".into(),
        ));
    }
    let valid = state
        .ledger
        .verify_signature(&request.author_wallet, &request.signature, &request.description)
        .await?;
    if !valid {
        return Err(AppError::InvalidSignature(request.author_wallet));
    }

    let update = state
        .store
        .insert_update(id, &request.author_wallet, &request.description)
        .await?;
    info!(project_id = id, author = %request.author_wallet, "project update posted");
    Ok(Json(update))
}

async fn require_project(state: &AppState, id: i64) -> AppResult<Project> {
    state
        .store
        .get_project(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("project {}", id)))
}
