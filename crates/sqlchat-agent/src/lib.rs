//! Tool-calling agent orchestration for conversational SQL.
//!
//! An [`Agent`] turns a user message plus the stored conversation into
//! model round trips and database tool calls, and answers with display
//! text, an optional SQL statement and a trace of what it did. The model and
//! the database are collaborators behind the [`ReasoningModel`] and
//! [`Database`] traits.

pub mod agent;
pub mod assemble;
pub mod database;
pub mod error;
pub mod guard;
pub mod model;
pub mod normalize;
pub mod session;
pub mod tools;
pub mod types;

pub use agent::{Agent, AgentConfig, ChatResponse};
pub use assemble::{Assembled, assemble};
pub use database::{Database, QueryOutput};
pub use error::{AgentError, DatabaseError, ModelError, ToolError};
pub use guard::{GuardedStatement, SafetyGuard, Verdict};
pub use model::{ModelReply, ModelRequest, ReasoningModel, RequestedCall};
pub use normalize::{DbValue, Row, normalize, normalize_rows};
pub use session::{Session, SessionLease, SessionStore};
pub use tools::{ToolExecution, ToolName, ToolOptions, ToolRegistry, ToolSpec};
pub use types::{Role, Termination, ToolCall, ToolResult, TraceEntry, Turn};
