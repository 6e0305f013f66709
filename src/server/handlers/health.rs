//! `/health` liveness check and `/metrics` Prometheus exposition (ambient,
//! not named in §6's route table but carried the way the teacher carries
//! its own `/health` route).

use crate::server::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;

pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
