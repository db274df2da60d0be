use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::{Value, json};
use sqlchat_agent::Turn;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions/{id}", delete(delete_session))
        .route("/sessions/{id}/history", get(session_history))
}

pub async fn session_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Turn>>, ServerError> {
    state
        .sessions()
        .history(&id)
        .await
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("session '{id}'")))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    Json(json!({ "deleted": state.sessions().remove(&id) }))
}
