//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use sqlchat_agent::AgentConfig;

/// Runtime configuration for sqlchat-server.
///
/// Every field has a default so the server starts without any environment
/// variables set (it still needs a reachable MySQL and an API key to be
/// useful).
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5000"`).
    pub bind_address: String,

    /// MySQL connection URL (default: `"mysql://root@localhost:3306/sql_web"`).
    pub database_url: String,

    pub db_max_connections: u32,

    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated list of allowed CORS origins. `None` means wildcard.
    pub cors_allowed_origins: Option<String>,

    /// Base URL of an OpenAI-compatible API, without the trailing
    /// `/chat/completions`.
    pub llm_base_url: String,

    pub llm_api_key: Option<String>,

    pub llm_model: String,

    pub model_timeout: Duration,

    pub db_timeout: Duration,

    /// Model round trips per chat request before a summary is forced.
    pub max_iterations: usize,

    /// Sessions kept in memory before the least recently used is evicted.
    pub session_capacity: usize,

    /// Prior turns sent to the model with each request.
    pub history_window: usize,

    /// Offer the `execute_statement` tool (DML and `DROP TABLE`) to the model.
    pub allow_writes: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("SQLCHAT_BIND", "0.0.0.0:5000"),
            database_url: env_or("SQLCHAT_DATABASE_URL", "mysql://root@localhost:3306/sql_web"),
            db_max_connections: parse_env("SQLCHAT_DB_MAX_CONNECTIONS", 8),
            log_level: env_or("SQLCHAT_LOG", "info"),
            log_json: flag_env("SQLCHAT_LOG_JSON", false),
            cors_allowed_origins: non_empty_env("SQLCHAT_CORS_ORIGINS"),
            llm_base_url: env_or("SQLCHAT_LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_api_key: non_empty_env("SQLCHAT_LLM_API_KEY")
                .or_else(|| non_empty_env("OPENAI_API_KEY")),
            llm_model: env_or("SQLCHAT_LLM_MODEL", "gpt-4o-mini"),
            model_timeout: Duration::from_secs(parse_env("SQLCHAT_MODEL_TIMEOUT_SECS", 60)),
            db_timeout: Duration::from_secs(parse_env("SQLCHAT_DB_TIMEOUT_SECS", 30)),
            max_iterations: parse_env("SQLCHAT_MAX_ITERATIONS", 6),
            session_capacity: parse_env("SQLCHAT_SESSION_CAPACITY", 100),
            history_window: parse_env("SQLCHAT_HISTORY_WINDOW", 40),
            allow_writes: flag_env("SQLCHAT_ALLOW_WRITES", true),
        }
    }

    /// Agent settings derived from this configuration.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.max_iterations.max(1),
            model_timeout: self.model_timeout,
            db_timeout: self.db_timeout,
            history_window: self.history_window,
            allow_write_statements: self.allow_writes,
            ..AgentConfig::default()
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| parse_flag(&v).unwrap_or(default))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
