pub mod chat;
pub mod run;
pub mod session;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Routes nested under `/api`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(chat::router())
        .merge(run::router())
        .merge(session::router())
}
