use serde::{Deserialize, Serialize};
use sqlchat_agent::{ChatResponse as AgentResponse, Termination, TraceEntry, Turn};

/// A single message as sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"user"`, `"assistant"`, ...
    pub role: String,
    pub content: String,
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Omitted on the first message; the response carries the id to reuse.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Client-side transcript; the last `user` message is the new utterance.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Shorthand for a single user message. Takes precedence over `messages`.
    #[serde(default)]
    pub message: Option<String>,
}

impl ChatRequest {
    /// The utterance to answer, if the request carries one.
    pub fn utterance(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or_else(|| {
                self.messages
                    .iter()
                    .rev()
                    .find(|m| m.role.eq_ignore_ascii_case("user"))
                    .map(|m| m.content.as_str())
            })
            .filter(|m| !m.trim().is_empty())
    }
}

/// Response body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    pub sql: Option<String>,
    pub trace: Vec<TraceEntry>,
    pub history: Vec<Turn>,
    pub termination: Termination,
    pub iterations: usize,
}

impl From<AgentResponse> for ChatResponse {
    fn from(r: AgentResponse) -> Self {
        Self {
            session_id: r.session_id,
            response: r.text,
            sql: r.sql,
            trace: r.trace,
            history: r.history,
            termination: r.termination,
            iterations: r.iterations,
        }
    }
}
