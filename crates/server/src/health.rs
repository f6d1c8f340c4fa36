use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use opsgate_core::OperationId;
use serde_json::Value;

use crate::error::ApiError;
use crate::routes::read;
use crate::state::AppState;

/// Liveness only. Mounted outside the bearer check and never touches an upstream.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::HealthCheck, Vec::new()).await
}
