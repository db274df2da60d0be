use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`crate::Database`] implementation.
#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    /// The statement itself was rejected (syntax error, missing column, ...).
    /// Recoverable: the agent feeds it back to the model.
    #[error("query failed: {0}")]
    Query(String),

    /// The connection or pool failed. Terminal for the current request.
    #[error("database connection failed: {0}")]
    Connection(String),
}

/// Errors raised by a [`crate::ReasoningModel`] implementation.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Tool-level failures.
///
/// These never abort the agent loop; they are rendered into
/// [`crate::ToolResult::Err`] and shown to the model as an observation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    Validation(String),

    #[error("statement blocked: {0}")]
    SafetyBlocked(String),

    #[error("table '{name}' does not exist; available tables: {available}")]
    UnknownTable { name: String, available: String },

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("{0}")]
    Query(String),
}

/// Errors that terminate a chat request. The session is never mutated when
/// one of these is returned.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("database unavailable: {0}")]
    Database(String),

    #[error("{collaborator} call timed out after {}s", .after.as_secs())]
    Timeout {
        collaborator: &'static str,
        after: Duration,
    },
}

impl AgentError {
    /// `true` for failures of an external collaborator (model or database
    /// transport, timeouts) as opposed to a malformed request.
    pub fn is_external(&self) -> bool {
        !matches!(self, AgentError::InvalidRequest(_))
    }
}
