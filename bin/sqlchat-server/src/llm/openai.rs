//! OpenAI-compatible `/chat/completions` client with tool calling.
//!
//! Works against any server that speaks the OpenAI wire format (OpenAI,
//! vLLM, Ollama, llama.cpp server, ...).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use sqlchat_agent::{
    ModelError, ModelReply, ModelRequest, ReasoningModel, RequestedCall, Role, ToolSpec, Turn,
};

/// Response bodies longer than this are cut before being put in an error.
const MAX_ERROR_BODY: usize = 512;

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_owned(),
            content: Some(content.to_owned()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

// ── Conversion ───────────────────────────────────────────────────────────────

/// Expand the conversation into OpenAI messages.
///
/// A `tool` turn becomes an assistant message carrying the calls, followed by
/// one `tool` message per call with its observation.
fn to_messages(system: &str, turns: &[Turn]) -> Vec<WireMessage> {
    let mut messages = vec![WireMessage::text("system", system)];
    for turn in turns {
        match turn.role {
            Role::User => messages.push(WireMessage::text("user", &turn.content)),
            Role::Assistant => messages.push(WireMessage::text("assistant", &turn.content)),
            Role::Tool => {
                messages.push(WireMessage {
                    role: "assistant".to_owned(),
                    content: Some(turn.content.clone()).filter(|c| !c.is_empty()),
                    tool_calls: turn
                        .tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            kind: function_kind(),
                            function: WireFunction {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect(),
                    tool_call_id: None,
                });
                for call in &turn.tool_calls {
                    let observation = call
                        .result
                        .as_ref()
                        .map(|r| r.to_observation())
                        .unwrap_or_else(|| serde_json::json!({ "error": "not executed" }));
                    messages.push(WireMessage {
                        role: "tool".to_owned(),
                        content: Some(observation.to_string()),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(call.id.clone()),
                    });
                }
            }
        }
    }
    messages
}

fn to_reply(response: CompletionResponse) -> Result<ModelReply, ModelError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| ModelError::InvalidResponse("response has no choices".into()))?;

    let content = message.content.filter(|c| !c.trim().is_empty());
    if message.tool_calls.is_empty() {
        return Ok(ModelReply::Final {
            text: content.unwrap_or_default(),
        });
    }

    let calls = message
        .tool_calls
        .into_iter()
        .map(|call| {
            // Unparsable arguments are passed on as a string; tool validation
            // reports them back to the model.
            let arguments = match call.function.arguments.trim() {
                "" => Value::Null,
                raw => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned())),
            };
            RequestedCall {
                id: Some(call.id).filter(|id| !id.is_empty()),
                name: call.function.name,
                arguments,
            }
        })
        .collect();
    Ok(ModelReply::ToolCalls {
        calls,
        thinking: content,
    })
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct OpenAiChatModel {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("sqlchat-server/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ReasoningModel for OpenAiChatModel {
    async fn respond(&self, request: ModelRequest<'_>) -> Result<ModelReply, ModelError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: to_messages(request.system, request.turns),
            tools: request
                .tools
                .iter()
                .map(|spec| WireTool {
                    kind: "function",
                    function: spec,
                })
                .collect(),
        };
        debug!(model = %self.model, messages = body.messages.len(), "sending chat completion");

        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        to_reply(parsed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use sqlchat_agent::{ToolCall, ToolResult};

    #[test]
    fn tool_turns_expand_into_call_and_observation_messages() {
        let turns = vec![
            Turn::user("List all tables"),
            Turn::tool(
                "",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "list_tables".into(),
                    arguments: json!({}),
                    result: Some(ToolResult::Ok(json!({ "tables": ["users"], "count": 1 }))),
                }],
            ),
        ];
        let messages = to_messages("be brief", &turns);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(messages[2].content, None);
        assert_eq!(messages[2].tool_calls[0].function.arguments, "{}");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(
            serde_json::from_str::<Value>(messages[3].content.as_deref().unwrap()).unwrap(),
            json!({ "tables": ["users"], "count": 1 })
        );
    }

    #[test]
    fn tool_call_response_is_parsed() {
        let response: CompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Let me look.",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": { "name": "describe_table", "arguments": "{\"table_name\":\"users\"}" }
                    }]
                }
            }]
        }))
        .unwrap();
        match to_reply(response).unwrap() {
            ModelReply::ToolCalls { calls, thinking } => {
                assert_eq!(thinking.as_deref(), Some("Let me look."));
                assert_eq!(calls[0].id.as_deref(), Some("call_9"));
                assert_eq!(calls[0].arguments, json!({ "table_name": "users" }));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn plain_response_is_final() {
        let response: CompletionResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Two tables." } }]
        }))
        .unwrap();
        assert_eq!(
            to_reply(response).unwrap(),
            ModelReply::Final { text: "Two tables.".into() }
        );
    }

    #[test]
    fn empty_choices_are_invalid() {
        let response = CompletionResponse { choices: Vec::new() };
        assert!(matches!(to_reply(response), Err(ModelError::InvalidResponse(_))));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = truncate("é".repeat(400));
        assert!(body.len() <= MAX_ERROR_BODY + 3);
        assert!(body.ends_with("..."));
    }
}
