//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use sqlchat_agent::{Agent, Database, ReasoningModel, SafetyGuard, SessionStore};

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    pub agent: Arc<Agent>,
    /// Used directly by `/api/run`, which bypasses the agent.
    pub db: Arc<dyn Database>,
    pub guard: SafetyGuard,
}

impl AppState {
    pub fn new(config: Config, model: Arc<dyn ReasoningModel>, db: Arc<dyn Database>) -> Self {
        let agent_config = config.agent_config();
        let guard = SafetyGuard::new(agent_config.row_cap);
        let sessions = Arc::new(SessionStore::new(config.session_capacity));
        let agent = Agent::new(model, db.clone(), sessions, agent_config);
        Self {
            config: Arc::new(config),
            agent: Arc::new(agent),
            db,
            guard,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        self.agent.sessions()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("sessions", &self.sessions().len())
            .finish_non_exhaustive()
    }
}
