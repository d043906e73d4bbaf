use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use uptime_core::{ReconcileSummary, ScheduleView, SchedulerError, SchedulerState};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ScheduleResponse {
    pub state: SchedulerState,
    pub pool_size: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub entries: Vec<ScheduleView>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedule", get(get_schedule))
        .route("/reconcile", post(reconcile))
}

/// GET /api/v1/schedule
async fn get_schedule(State(state): State<AppState>) -> Result<Json<ScheduleResponse>, ApiError> {
    let scheduler = &state.scheduler;
    let entries = scheduler.snapshot().await?;
    Ok(Json(ScheduleResponse {
        state: scheduler.state().await,
        pool_size: scheduler.pool_size(),
        queued: scheduler.queued(),
        in_flight: scheduler.in_flight(),
        entries,
    }))
}

/// POST /api/v1/reconcile
async fn reconcile(State(state): State<AppState>) -> Result<Json<ReconcileSummary>, ApiError> {
    match state.scheduler.reconcile().await {
        Ok(summary) => Ok(Json(summary)),
        Err(SchedulerError::Reconcile(e)) => Err(ApiError::Unavailable(format!(
            "Target store unreachable, schedule unchanged: {}",
            e
        ))),
        Err(e) => Err(e.into()),
    }
}
