//! The call/observe loop.
//!
//! One request runs as an explicit state machine:
//!
//! ```text
//! AwaitingModel --final answer--> Done
//! AwaitingModel --tool calls----> ExecutingTools --> AwaitingModel
//! AwaitingModel --iteration cap--> Done (forced summary)
//! any state     --collaborator failure--> Failed
//! ```
//!
//! New turns are buffered while the loop runs and committed to the session
//! only when it reaches `Done`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::assemble::assemble;
use crate::database::Database;
use crate::error::AgentError;
use crate::guard::{DEFAULT_ROW_CAP, SafetyGuard};
use crate::model::{ModelReply, ModelRequest, ReasoningModel, RequestedCall};
use crate::session::SessionStore;
use crate::tools::{ToolExecution, ToolOptions, ToolRegistry, ToolSpec};
use crate::types::{Termination, ToolCall, ToolResult, TraceEntry, Turn};

pub const DEFAULT_MAX_ITERATIONS: usize = 6;
pub const DEFAULT_HISTORY_WINDOW: usize = 40;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a MySQL assistant. You answer questions about the connected database \
by calling the tools you are given.
- Inspect the schema (list_tables, describe_table, find_relationships) before writing queries.
- Use execute_select_query for reads. Results without LIMIT are capped at 100 rows.
- Only change data with execute_statement when the user explicitly asks for it.
- Dropping or truncating a whole database is never allowed.
When you propose a query for the user to run, put it in a ```sql fenced block.
Answer concisely.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model round trips per request before a summary is forced.
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub db_timeout: Duration,
    /// Cap appended to unbounded `SELECT`s.
    pub row_cap: u32,
    pub preview_default: u32,
    pub preview_max: u32,
    /// Prior turns sent to the model. The stored history is never truncated.
    pub history_window: usize,
    pub system_prompt: String,
    pub allow_write_statements: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            model_timeout: Duration::from_secs(60),
            db_timeout: Duration::from_secs(30),
            row_cap: DEFAULT_ROW_CAP,
            preview_default: 5,
            preview_max: 50,
            history_window: DEFAULT_HISTORY_WINDOW,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            allow_write_statements: true,
        }
    }
}

/// Result of one successful chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    /// Display text, SQL fences removed.
    pub text: String,
    pub sql: Option<String>,
    pub trace: Vec<TraceEntry>,
    /// Full session history after this request.
    pub history: Vec<Turn>,
    pub termination: Termination,
    pub iterations: usize,
}

#[derive(Debug)]
enum LoopState {
    AwaitingModel,
    ExecutingTools {
        calls: Vec<RequestedCall>,
        thinking: Option<String>,
    },
    Done {
        text: String,
        termination: Termination,
    },
    Failed(AgentError),
}

pub struct Agent {
    model: Arc<dyn ReasoningModel>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ReasoningModel>,
        db: Arc<dyn Database>,
        sessions: Arc<SessionStore>,
        config: AgentConfig,
    ) -> Self {
        let options = ToolOptions {
            preview_default: config.preview_default,
            preview_max: config.preview_max,
            db_timeout: config.db_timeout,
            allow_write_statements: config.allow_write_statements,
        };
        let tools = ToolRegistry::new(db, SafetyGuard::new(config.row_cap), options);
        Self {
            model,
            tools: Arc::new(tools),
            sessions,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one user message against the session `session_id`.
    ///
    /// On success the user turn, one `tool` turn per executed batch and the
    /// assistant turn are appended to the session. On error the session is
    /// left exactly as it was; a session first seen by a failed request is
    /// not kept.
    pub async fn chat(&self, session_id: &str, message: &str) -> Result<ChatResponse, AgentError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(AgentError::InvalidRequest("session id must not be empty".into()));
        }
        if message.trim().is_empty() {
            return Err(AgentError::InvalidRequest("message must not be empty".into()));
        }

        let mut lease = self.sessions.get_or_create(session_id).await;
        let prior = lease.turns();
        let window = prior[prior.len().saturating_sub(self.config.history_window)..].to_vec();

        let specs = self.tools.specs();
        let mut pending = vec![Turn::user(message)];
        let mut trace: Vec<TraceEntry> = Vec::new();
        let mut iterations = 0usize;
        let mut state = LoopState::AwaitingModel;

        let (text, termination) = loop {
            state = match state {
                LoopState::AwaitingModel if iterations >= self.config.max_iterations => {
                    warn!(session_id, iterations, "iteration cap reached; forcing a summary");
                    LoopState::Done {
                        text: forced_summary(iterations, &trace),
                        termination: Termination::IterationCap,
                    }
                }
                LoopState::AwaitingModel => {
                    iterations += 1;
                    let turns: Vec<Turn> = window.iter().chain(pending.iter()).cloned().collect();
                    self.ask_model(session_id, iterations, &turns, &specs).await
                }
                LoopState::ExecutingTools { calls, thinking } => {
                    let thinking = thinking.map(|t| t.trim().to_owned()).unwrap_or_default();
                    if !thinking.is_empty() {
                        trace.push(TraceEntry::Thought {
                            text: thinking.clone(),
                        });
                    }
                    match self.execute_batch(session_id, calls).await {
                        Ok(executed) => {
                            for (call, exec) in &executed {
                                trace.push(TraceEntry::Action {
                                    tool: call.name.clone(),
                                    arguments: call.arguments.clone(),
                                    summary: exec.summary.clone(),
                                    warning: exec.warning.clone(),
                                });
                            }
                            let calls = executed.into_iter().map(|(call, _)| call).collect();
                            pending.push(Turn::tool(thinking, calls));
                            LoopState::AwaitingModel
                        }
                        Err(e) => LoopState::Failed(e),
                    }
                }
                LoopState::Done { text, termination } => break (text, termination),
                LoopState::Failed(e) => {
                    warn!(session_id, iterations, error = %e, "agent run failed; session left untouched");
                    self.sessions.release(lease);
                    return Err(e);
                }
            };
        };

        pending.push(Turn::assistant(text.clone()));
        let history = self.sessions.commit(&mut lease, pending);
        drop(lease);

        info!(session_id, iterations, %termination, "agent run complete");
        let assembled = assemble(&text, trace);
        Ok(ChatResponse {
            session_id: session_id.to_owned(),
            text: assembled.text,
            sql: assembled.sql,
            trace: assembled.trace,
            history,
            termination,
            iterations,
        })
    }

    async fn ask_model(
        &self,
        session_id: &str,
        iteration: usize,
        turns: &[Turn],
        tools: &[ToolSpec],
    ) -> LoopState {
        let request = ModelRequest {
            system: &self.config.system_prompt,
            turns,
            tools,
        };
        let started = Instant::now();
        let reply = tokio::time::timeout(self.config.model_timeout, self.model.respond(request)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match reply {
            Err(_) => LoopState::Failed(AgentError::Timeout {
                collaborator: "model",
                after: self.config.model_timeout,
            }),
            Ok(Err(e)) => LoopState::Failed(e.into()),
            Ok(Ok(ModelReply::Final { text })) => {
                debug!(session_id, iteration, latency_ms, "model returned a final answer");
                LoopState::Done {
                    text,
                    termination: Termination::FinalAnswer,
                }
            }
            Ok(Ok(ModelReply::ToolCalls { calls, thinking })) if calls.is_empty() => {
                debug!(session_id, iteration, latency_ms, "model returned an empty tool batch");
                LoopState::Done {
                    text: thinking.unwrap_or_default(),
                    termination: Termination::FinalAnswer,
                }
            }
            Ok(Ok(ModelReply::ToolCalls { calls, thinking })) => {
                info!(session_id, iteration, latency_ms, calls = calls.len(), "model requested tools");
                LoopState::ExecutingTools { calls, thinking }
            }
        }
    }

    /// Run one batch concurrently; results come back in request order.
    ///
    /// Each call runs on its own task, so a dropped request does not cancel a
    /// statement that is already executing.
    async fn execute_batch(
        &self,
        session_id: &str,
        calls: Vec<RequestedCall>,
    ) -> Result<Vec<(ToolCall, ToolExecution)>, AgentError> {
        let handles: Vec<_> = calls
            .into_iter()
            .map(|requested| {
                let call = ToolCall {
                    id: requested
                        .id
                        .filter(|id| !id.trim().is_empty())
                        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple())),
                    name: requested.name,
                    arguments: requested.arguments,
                    result: None,
                };
                let tools = self.tools.clone();
                let (name, arguments) = (call.name.clone(), call.arguments.clone());
                let span = info_span!("tool", session_id, tool = %name, call_id = %call.id);
                let handle =
                    tokio::spawn(async move { tools.execute(&name, &arguments).await }.instrument(span));
                (call, handle)
            })
            .collect();

        let (calls, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        let mut executed = Vec::with_capacity(calls.len());
        let mut failure = None;
        for (mut call, outcome) in calls.into_iter().zip(joined) {
            let exec = match outcome {
                Ok(Ok(exec)) => exec,
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                    continue;
                }
                Err(join_error) => {
                    warn!(tool = %call.name, error = %join_error, "tool task aborted");
                    let result = ToolResult::Err(format!("tool execution aborted: {join_error}"));
                    ToolExecution {
                        summary: crate::tools::summarize(&result),
                        result,
                        warning: None,
                    }
                }
            };
            call.result = Some(exec.result.clone());
            executed.push((call, exec));
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(executed),
        }
    }
}

/// Text committed as the assistant turn when the model never converges.
fn forced_summary(iterations: usize, trace: &[TraceEntry]) -> String {
    let actions: Vec<String> = trace
        .iter()
        .filter_map(|entry| match entry {
            TraceEntry::Action { tool, summary, .. } => Some(format!("- {tool}: {summary}")),
            TraceEntry::Thought { .. } => None,
        })
        .collect();

    let mut text = format!(
        "I stopped after {iterations} rounds of tool calls without reaching a final answer."
    );
    if actions.is_empty() {
        text.push_str(" No tools were run.");
    } else {
        text.push_str(" Here is what I found so far:\n\n");
        text.push_str(&actions.join("\n"));
    }
    text
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn forced_summary_lists_actions_in_order() {
        let trace = vec![
            TraceEntry::Thought { text: "look around".into() },
            TraceEntry::Action {
                tool: "list_tables".into(),
                arguments: serde_json::Value::Null,
                summary: "2 tables: users, orders".into(),
                warning: None,
            },
            TraceEntry::Action {
                tool: "describe_table".into(),
                arguments: serde_json::json!({ "table_name": "users" }),
                summary: "3 columns".into(),
                warning: None,
            },
        ];
        let text = forced_summary(6, &trace);
        assert!(text.starts_with("I stopped after 6 rounds"));
        assert!(text.ends_with("- list_tables: 2 tables: users, orders\n- describe_table: 3 columns"));
    }

    #[test]
    fn default_config_matches_documented_limits() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 6);
        assert_eq!(config.row_cap, 100);
        assert_eq!((config.preview_default, config.preview_max), (5, 50));
    }
}
