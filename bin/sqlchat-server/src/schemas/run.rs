use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `POST /api/run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub query: String,
}

/// Response body for `POST /api/run`.
///
/// `data` is the row set for row-returning statements and a
/// `"Query OK. Rows affected: N"` message otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Row cap appended by the safety guard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_applied: Option<u32>,
    /// Set for statements that destroy or rewrite data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl RunResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            limit_applied: None,
            warning: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            limit_applied: None,
            warning: None,
        }
    }
}
