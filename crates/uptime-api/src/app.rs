use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use uptime_core::SchedulerState;

use crate::metrics::metrics_handler;
use crate::routes;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let api_v1 = routes::router();

    Router::new()
        .nest("/api/v1", api_v1)
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 503 once the scheduler has begun shutting down.
async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.scheduler.state().await {
        SchedulerState::Stopping | SchedulerState::Stopped => {
            (StatusCode::SERVICE_UNAVAILABLE, "stopping")
        }
        _ => (StatusCode::OK, "ok"),
    }
}
