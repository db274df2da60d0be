use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

/// Author of a [`Turn`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One message-equivalent unit of a conversation.
///
/// A `tool` turn holds one executed batch: the calls the model requested, each
/// with its result attached, and as `content` whatever text the model sent
/// alongside the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), Vec::new())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), Vec::new())
    }

    pub fn tool(thinking: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self::new(Role::Tool, thinking.into(), calls)
    }

    fn new(role: Role, content: String, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role,
            content,
            tool_calls,
            created_at: Utc::now(),
        }
    }
}

/// A request for a single tool invocation, with its outcome once executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id assigned by the model (or generated when absent).
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
}

/// Outcome of a tool invocation. Payloads are always normalized JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResult {
    Ok(Value),
    Err(String),
}

impl ToolResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok(_))
    }

    /// JSON rendering used when the result is shown to the model.
    pub fn to_observation(&self) -> Value {
        match self {
            ToolResult::Ok(v) => v.clone(),
            ToolResult::Err(message) => serde_json::json!({ "error": message }),
        }
    }
}

/// Observational record of one agent-loop step. Never replayed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEntry {
    Thought {
        text: String,
    },
    Action {
        tool: String,
        arguments: Value,
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
}

/// How a completed agent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Termination {
    /// The model produced a final answer.
    FinalAnswer,
    /// The iteration cap was reached and a summary was synthesized.
    IterationCap,
}
