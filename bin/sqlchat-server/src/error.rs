//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON `{"error": ...}`
//! body with an appropriate status code.
//!
//! Internal errors are logged with full detail; the caller only gets a
//! generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sqlchat_agent::AgentError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The reasoning model or the database failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// A collaborator did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AgentError> for ServerError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::InvalidRequest(m) => ServerError::BadRequest(m),
            e @ AgentError::Timeout { .. } => ServerError::Timeout(e.to_string()),
            e @ (AgentError::Model(_) | AgentError::Database(_)) => {
                ServerError::Upstream(e.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::Upstream(m) => {
                warn!(error = %m, "upstream collaborator failed");
                (StatusCode::BAD_GATEWAY, m.clone())
            }
            ServerError::Timeout(m) => {
                warn!(error = %m, "upstream collaborator timed out");
                (StatusCode::GATEWAY_TIMEOUT, m.clone())
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sqlchat_agent::ModelError;
    use std::time::Duration;

    #[test]
    fn agent_errors_map_to_status_codes() {
        let cases = [
            (AgentError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (AgentError::Model(ModelError::Transport("reset".into())), StatusCode::BAD_GATEWAY),
            (AgentError::Database("refused".into()), StatusCode::BAD_GATEWAY),
            (
                AgentError::Timeout {
                    collaborator: "model",
                    after: Duration::from_secs(60),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let resp = ServerError::Internal("secret path".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
