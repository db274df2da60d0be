//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - middleware layers (CORS, per-request trace id)
//! - health route
//! - `/api` routes (chat, direct statement execution, sessions)

mod api;
mod health;

use std::sync::Arc;

use axum::{Router, middleware};
use tower::ServiceBuilder;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api", api::router())
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state.config)))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
