mod schedule;
mod targets;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(targets::router())
        .merge(schedule::router())
}
