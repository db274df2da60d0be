//! The reasoning model, consumed as an opaque capability: given the
//! conversation and the tool schema, answer or ask for tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::tools::ToolSpec;
use crate::types::Turn;

/// One round-trip request.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub turns: &'a [Turn],
    pub tools: &'a [ToolSpec],
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl RequestedCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }
}

/// Either a final answer or a batch of tool calls.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Final {
        text: String,
    },
    ToolCalls {
        calls: Vec<RequestedCall>,
        thinking: Option<String>,
    },
}

#[async_trait]
pub trait ReasoningModel: Send + Sync + 'static {
    async fn respond(&self, request: ModelRequest<'_>) -> Result<ModelReply, ModelError>;
}
