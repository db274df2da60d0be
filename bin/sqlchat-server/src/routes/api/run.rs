//! `POST /api/run`: execute one statement directly, without the agent.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tracing::{info, warn};

use sqlchat_agent::{DatabaseError, QueryOutput, Verdict, normalize_rows};

use crate::error::ServerError;
use crate::schemas::run::{RunRequest, RunResponse};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/run", post(run_query))
}

/// Statement-level failures (blocked, SQL errors) are reported in the body
/// with `success: false`; connection failures and timeouts are HTTP errors.
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResponse>, ServerError> {
    if req.query.trim().is_empty() {
        return Err(ServerError::BadRequest("query must not be empty".into()));
    }

    let stmt = match state.guard.classify(&req.query) {
        Verdict::Allowed(stmt) => stmt,
        Verdict::Blocked(reason) => {
            warn!(reason = %reason, "run request blocked");
            return Ok(Json(RunResponse::failed(reason)));
        }
    };

    let timeout = state.config.db_timeout;
    let output = match tokio::time::timeout(timeout, state.db.execute(&stmt.sql)).await {
        Err(_) => {
            return Err(ServerError::Timeout(format!(
                "database call timed out after {}s",
                timeout.as_secs()
            )));
        }
        Ok(Err(DatabaseError::Connection(m))) => return Err(ServerError::Upstream(m)),
        Ok(Err(DatabaseError::Query(m))) => return Ok(Json(RunResponse::failed(m))),
        Ok(Ok(output)) => output,
    };

    let data = match output {
        QueryOutput::Rows(rows) => {
            info!(rows = rows.len(), "run request returned rows");
            normalize_rows(&rows)
        }
        QueryOutput::Affected { rows_affected } => {
            info!(rows_affected, "run request executed");
            Value::String(format!("Query OK. Rows affected: {rows_affected}"))
        }
    };

    Ok(Json(RunResponse {
        limit_applied: stmt.limit_applied,
        warning: stmt.warning,
        ..RunResponse::ok(data)
    }))
}
