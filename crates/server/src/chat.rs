use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use opsgate_agent::TurnOutcome;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

pub const CHAT_PREFIX: &str = "/api/agent";

const MAX_MESSAGE_CHARS: usize = 4_000;
const MAX_SESSION_ID_CHARS: usize = 64;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    pub outcome: TurnOutcome,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub session_id: String,
    pub reset: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/{session_id}/reset", post(reset))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    let session_id = match request.session_id.as_deref().map(str::trim) {
        Some(id) if !valid_session_id(id) => {
            return Err(ApiError::BadRequest("session_id is malformed".to_string()));
        }
        other => other,
    };

    let (session_id, slot) = state.sessions.checkout(&state.runtime, session_id).await;
    let mut session = slot.lock().await;
    let reply = state.runtime.handle_message(&mut session, message).await;
    drop(session);

    info!(
        event_name = "http.chat.turn",
        session_id = %session_id,
        outcome = ?reply.outcome,
        violation_count = reply.violation_count,
        "chat turn handled"
    );

    Ok(Json(ChatResponse { session_id, response: reply.message, outcome: reply.outcome }))
}

async fn reset(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    if !state.sessions.reset(&session_id).await {
        return Err(ApiError::NotFound(format!("session {session_id} not found")));
    }

    info!(event_name = "http.chat.reset", session_id = %session_id, "session reset on request");
    Ok(Json(ResetResponse { session_id, reset: true }))
}

fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_CHARS
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::valid_session_id;

    #[test]
    fn session_ids_are_restricted() {
        assert!(valid_session_id("3f6c2a4e-1b7d-4c1e-9a0b-2d4e6f8a0b1c"));
        assert!(valid_session_id("ops_console-1"));
        assert!(!valid_session_id(""));
        assert!(!valid_session_id("../etc"));
        assert!(!valid_session_id(&"a".repeat(65)));
    }
}
