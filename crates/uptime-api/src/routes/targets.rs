use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use uptime_core::{
    CheckResult, MonitoredTarget, NewTarget, TargetCounters, TargetId, TargetPatch,
};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_RESULT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub url: String,
    pub name: Option<String>,
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct TargetDetail {
    #[serde(flatten)]
    pub target: MonitoredTarget,
    pub last_result: Option<CheckResult>,
    pub counters: Option<TargetCounters>,
}

#[derive(Serialize)]
pub struct DeleteTargetResponse {
    pub message: String,
    pub id: TargetId,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/targets", post(create_target).get(list_targets))
        .route(
            "/targets/{id}",
            get(get_target).patch(update_target).delete(delete_target),
        )
        .route("/targets/{id}/results", get(target_results))
        .route("/targets/{id}/check", post(check_now))
        .route("/results", get(all_results))
}

fn parse_target_id(id: &str) -> Result<TargetId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid target ID: {}", id)))
}

fn result_limit(state: &AppState, query: &ResultsQuery) -> usize {
    query
        .limit
        .unwrap_or(DEFAULT_RESULT_LIMIT)
        .clamp(1, state.config.history_limit.max(1))
}

/// The store write has already committed; a stopped scheduler catches up on
/// its next reconcile, so the request still succeeds.
fn notify(result: Result<(), uptime_core::SchedulerError>, id: TargetId) {
    if let Err(e) = result {
        warn!(target_id = %id, error = %e, "Scheduler not notified of target change");
    }
}

/// POST /api/v1/targets
async fn create_target(
    State(state): State<AppState>,
    Json(body): Json<CreateTargetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let interval = body
        .interval_secs
        .unwrap_or(state.config.default_interval.as_secs());
    let mut new = NewTarget::new(body.url, interval);
    if let Some(name) = body.name {
        new = new.with_name(name);
    }
    let new = new.validate(state.config.min_interval)?;

    let target = state.repo.create_target(new).await?;
    info!(target_id = %target.id, url = %target.url, interval_secs = target.interval_secs, "Target registered");
    notify(state.scheduler.notify_upsert(target.id), target.id);

    Ok((StatusCode::CREATED, Json(target)))
}

/// GET /api/v1/targets
async fn list_targets(State(state): State<AppState>) -> Result<Json<Vec<MonitoredTarget>>, ApiError> {
    let mut targets = state.repo.list_targets().await?;
    targets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(Json(targets))
}

/// GET /api/v1/targets/:id
async fn get_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TargetDetail>, ApiError> {
    let id = parse_target_id(&id)?;
    let target = state.repo.get_target(id).await?;
    let last_result = state.repo.list_results(Some(id), 1).await?.into_iter().next();

    Ok(Json(TargetDetail {
        target,
        last_result,
        counters: state.scheduler.stats().target(id),
    }))
}

/// PATCH /api/v1/targets/:id
async fn update_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<TargetPatch>,
) -> Result<Json<MonitoredTarget>, ApiError> {
    let id = parse_target_id(&id)?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one of name, url or interval_secs is required".into(),
        ));
    }
    let patch = patch.validate(state.config.min_interval)?;

    let target = state.repo.update_target(id, patch).await?;
    info!(target_id = %id, url = %target.url, interval_secs = target.interval_secs, "Target updated");
    notify(state.scheduler.notify_upsert(id), id);

    Ok(Json(target))
}

/// DELETE /api/v1/targets/:id
async fn delete_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteTargetResponse>, ApiError> {
    let id = parse_target_id(&id)?;
    let target = state.repo.delete_target(id).await?;
    info!(target_id = %id, url = %target.url, "Target deleted");
    notify(state.scheduler.notify_removed(id), id);

    Ok(Json(DeleteTargetResponse {
        message: "Target deleted".into(),
        id,
    }))
}

/// GET /api/v1/targets/:id/results
async fn target_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<CheckResult>>, ApiError> {
    let id = parse_target_id(&id)?;
    let limit = result_limit(&state, &query);
    Ok(Json(state.repo.list_results(Some(id), limit).await?))
}

/// GET /api/v1/results
async fn all_results(
    State(state): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<CheckResult>>, ApiError> {
    let limit = result_limit(&state, &query);
    Ok(Json(state.repo.list_results(None, limit).await?))
}

/// POST /api/v1/targets/:id/check
async fn check_now(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_target_id(&id)?;
    state.repo.get_target(id).await?;

    if !state.scheduler.fire_now(id).await? {
        return Err(ApiError::Conflict(format!("Target {} is not scheduled", id)));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Check dispatched".into(),
        }),
    ))
}
