use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tracing::info;
use uuid::Uuid;

use crate::error::ServerError;
use crate::schemas::chat::{ChatRequest, ChatResponse};
use crate::state::AppState;

/// Utterances larger than this are rejected.
const MAX_MESSAGE_BYTES: usize = 64 * 1024;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(chat))
}

/// Answer one user message within a session, running the agent loop.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ServerError> {
    let message = req
        .utterance()
        .ok_or_else(|| ServerError::BadRequest("request contains no user message".into()))?;
    if message.len() > MAX_MESSAGE_BYTES {
        return Err(ServerError::BadRequest(format!(
            "message exceeds {MAX_MESSAGE_BYTES} bytes"
        )));
    }

    let session_id = req
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!(session_id = %session_id, bytes = message.len(), "chat request");
    let response = state.agent.chat(&session_id, message).await?;
    Ok(Json(response.into()))
}
