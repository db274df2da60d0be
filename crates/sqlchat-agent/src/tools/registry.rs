use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use super::{Args, ToolName, ToolSpec, validate_args};
use crate::database::{Database, QueryOutput};
use crate::error::{AgentError, DatabaseError, ToolError};
use crate::guard::{SafetyGuard, Verdict, is_read_only};
use crate::normalize::{Row, normalize, normalize_rows};
use crate::types::ToolResult;

/// Tunables for tool execution.
#[derive(Debug, Clone)]
pub struct ToolOptions {
    pub preview_default: u32,
    pub preview_max: u32,
    /// Per-statement deadline for the database collaborator.
    pub db_timeout: Duration,
    /// Offer `execute_statement` to the model.
    pub allow_write_statements: bool,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            preview_default: 5,
            preview_max: 50,
            db_timeout: Duration::from_secs(30),
            allow_write_statements: true,
        }
    }
}

/// Outcome of one tool invocation, ready for the session and the trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    pub result: ToolResult,
    /// One-line description of the result for the trace.
    pub summary: String,
    /// Guard warning for destructive statements.
    pub warning: Option<String>,
}

enum Failure {
    Tool(ToolError),
    Fatal(AgentError),
}

impl From<ToolError> for Failure {
    fn from(e: ToolError) -> Self {
        Failure::Tool(e)
    }
}

/// Executes tools against the database collaborator.
///
/// Every SQL statement goes through the [`SafetyGuard`], every payload
/// through the normalizer. Tool-level problems become
/// [`ToolResult::Err`]; only collaborator failures surface as
/// [`AgentError`].
pub struct ToolRegistry {
    db: Arc<dyn Database>,
    guard: SafetyGuard,
    options: ToolOptions,
}

impl ToolRegistry {
    pub fn new(db: Arc<dyn Database>, guard: SafetyGuard, options: ToolOptions) -> Self {
        Self { db, guard, options }
    }

    pub fn guard(&self) -> &SafetyGuard {
        &self.guard
    }

    /// Tools currently offered to the model.
    pub fn tools(&self) -> Vec<ToolName> {
        ToolName::iter()
            .filter(|t| *t != ToolName::ExecuteStatement || self.options.allow_write_statements)
            .collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools()
            .into_iter()
            .map(|t| t.spec(self.options.preview_default, self.options.preview_max))
            .collect()
    }

    /// Validate and run the tool called `name`.
    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<ToolExecution, AgentError> {
        let mut warning = None;
        let outcome = match self.resolve_tool(name) {
            Ok(tool) => self.run(tool, arguments, &mut warning).await,
            Err(e) => Err(Failure::Tool(e)),
        };

        let result = match outcome {
            Ok(payload) => ToolResult::Ok(payload),
            Err(Failure::Tool(e)) => {
                debug!(tool = name, error = %e, "tool returned an error");
                ToolResult::Err(e.to_string())
            }
            Err(Failure::Fatal(e)) => return Err(e),
        };

        Ok(ToolExecution {
            summary: summarize(&result),
            result,
            warning,
        })
    }

    fn resolve_tool(&self, name: &str) -> Result<ToolName, ToolError> {
        name.trim()
            .parse::<ToolName>()
            .ok()
            .filter(|t| self.tools().contains(t))
            .ok_or_else(|| ToolError::UnknownTool(name.to_owned()))
    }

    async fn run(
        &self,
        tool: ToolName,
        arguments: &Value,
        warning: &mut Option<String>,
    ) -> Result<Value, Failure> {
        let params = tool.params(self.options.preview_default, self.options.preview_max);
        let args = validate_args(&params, arguments)?;

        match tool {
            ToolName::ListTables => {
                let tables = self.table_names().await?;
                Ok(json!({ "count": tables.len(), "tables": tables }))
            }
            ToolName::DescribeTable => self.describe_table(&args).await,
            ToolName::PreviewTableData => self.preview_table_data(&args).await,
            ToolName::ExecuteSelectQuery => self.execute_sql(&args, true, warning).await,
            ToolName::FindRelationships => self.find_relationships(&args).await,
            ToolName::ExecuteStatement => self.execute_sql(&args, false, warning).await,
        }
    }

    async fn describe_table(&self, args: &Args) -> Result<Value, Failure> {
        let table = self.resolve_table(required(args, "table_name")?).await?;
        let rows = self
            .query(&format!("SHOW COLUMNS FROM {}", quote_ident(&table)))
            .await?
            .into_rows();
        let columns: Vec<Value> = rows
            .iter()
            .map(|row| {
                let nullable = column(row, "Null")
                    .as_str()
                    .is_some_and(|s| s.eq_ignore_ascii_case("YES"));
                json!({
                    "field": column(row, "Field"),
                    "type": column(row, "Type"),
                    "nullable": nullable,
                    "default": column(row, "Default"),
                })
            })
            .collect();
        Ok(json!({ "table": table, "columns": columns }))
    }

    async fn preview_table_data(&self, args: &Args) -> Result<Value, Failure> {
        let table = self.resolve_table(required(args, "table_name")?).await?;
        let limit = args
            .int("limit")
            .unwrap_or(i64::from(self.options.preview_default));
        let sql = format!("SELECT * FROM {} LIMIT {limit}", quote_ident(&table));
        let stmt = match self.guard.classify(&sql) {
            Verdict::Allowed(stmt) => stmt,
            Verdict::Blocked(reason) => return Err(ToolError::SafetyBlocked(reason).into()),
        };
        let rows = self.query(&stmt.sql).await?.into_rows();
        Ok(json!({
            "table": table,
            "rows": normalize_rows(&rows),
            "row_count": rows.len(),
            "limit": limit,
        }))
    }

    async fn execute_sql(
        &self,
        args: &Args,
        read_only: bool,
        warning: &mut Option<String>,
    ) -> Result<Value, Failure> {
        let sql = required(args, "sql")?;
        let stmt = match self.guard.classify(sql) {
            Verdict::Allowed(stmt) => stmt,
            Verdict::Blocked(reason) => {
                warn!(reason = %reason, "tool statement blocked by safety guard");
                return Err(ToolError::SafetyBlocked(reason).into());
            }
        };
        warning.clone_from(&stmt.warning);

        if read_only && !is_read_only(&stmt.sql) {
            return Err(ToolError::Validation(format!(
                "{} only runs read-only statements (SELECT, SHOW, DESCRIBE, EXPLAIN)",
                ToolName::ExecuteSelectQuery
            ))
            .into());
        }

        match self.query(&stmt.sql).await? {
            QueryOutput::Rows(rows) => Ok(json!({
                "rows": normalize_rows(&rows),
                "row_count": rows.len(),
                "limit_applied": stmt.limit_applied,
            })),
            QueryOutput::Affected { rows_affected } => Ok(json!({ "affected_rows": rows_affected })),
        }
    }

    async fn find_relationships(&self, args: &Args) -> Result<Value, Failure> {
        let filter = match args.str("table_name") {
            Some(name) => {
                let table = quote_literal(&self.resolve_table(name).await?);
                format!(" AND (TABLE_NAME = {table} OR REFERENCED_TABLE_NAME = {table})")
            }
            None => String::new(),
        };
        let sql = format!(
            "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name, \
             REFERENCED_TABLE_NAME AS references_table, REFERENCED_COLUMN_NAME AS references_column \
             FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = DATABASE() AND REFERENCED_TABLE_NAME IS NOT NULL{filter} \
             ORDER BY TABLE_NAME, ORDINAL_POSITION"
        );
        let rows = self.query(&sql).await?.into_rows();
        let relationships: Vec<Value> = rows
            .iter()
            .map(|row| {
                json!({
                    "table": column(row, "table_name"),
                    "column": column(row, "column_name"),
                    "references_table": column(row, "references_table"),
                    "references_column": column(row, "references_column"),
                })
            })
            .collect();
        Ok(json!({ "count": relationships.len(), "relationships": relationships }))
    }

    async fn table_names(&self) -> Result<Vec<String>, Failure> {
        let rows = self.query("SHOW TABLES").await?.into_rows();
        Ok(rows
            .iter()
            .filter_map(|row| row.first())
            .filter_map(|(_, v)| match normalize(v) {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    /// Map a caller-supplied table name onto an existing table: exact match
    /// first, then case-insensitive.
    async fn resolve_table(&self, name: &str) -> Result<String, Failure> {
        let tables = self.table_names().await?;
        if let Some(t) = tables.iter().find(|t| *t == name) {
            return Ok(t.clone());
        }
        if let Some(t) = tables.iter().find(|t| t.eq_ignore_ascii_case(name)) {
            return Ok(t.clone());
        }
        let available = if tables.is_empty() {
            "(none)".to_owned()
        } else {
            tables.join(", ")
        };
        Err(ToolError::UnknownTable {
            name: name.to_owned(),
            available,
        }
        .into())
    }

    async fn query(&self, sql: &str) -> Result<QueryOutput, Failure> {
        debug!(sql, "executing statement");
        match tokio::time::timeout(self.options.db_timeout, self.db.execute(sql)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(DatabaseError::Query(message))) => Err(ToolError::Query(message).into()),
            Ok(Err(DatabaseError::Connection(message))) => {
                Err(Failure::Fatal(AgentError::Database(message)))
            }
            Err(_) => Err(Failure::Fatal(AgentError::Timeout {
                collaborator: "database",
                after: self.options.db_timeout,
            })),
        }
    }
}

fn required<'a>(args: &'a Args, name: &str) -> Result<&'a str, ToolError> {
    args.str(name)
        .ok_or_else(|| ToolError::Validation(format!("missing required argument '{name}'")))
}

/// Normalized value of the column called `name` (case-insensitive).
fn column(row: &Row, name: &str) -> Value {
    row.iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(name))
        .map(|(_, v)| normalize(v))
        .unwrap_or(Value::Null)
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// One-line description of a tool result.
pub(crate) fn summarize(result: &ToolResult) -> String {
    let payload = match result {
        ToolResult::Err(message) => return format!("error: {message}"),
        ToolResult::Ok(payload) => payload,
    };
    let count = |key: &str| payload.get(key).and_then(Value::as_u64);

    if let Some(n) = count("affected_rows") {
        return format!("{n} rows affected");
    }
    if let Some(n) = count("row_count") {
        return match payload.get("limit_applied").and_then(Value::as_u64) {
            Some(cap) => format!("{n} rows (capped at {cap})"),
            None => format!("{n} rows"),
        };
    }
    if let Some(tables) = payload.get("tables").and_then(Value::as_array) {
        let names: Vec<&str> = tables.iter().filter_map(Value::as_str).collect();
        return format!("{} tables: {}", names.len(), names.join(", "));
    }
    if let Some(columns) = payload.get("columns").and_then(Value::as_array) {
        return format!("{} columns", columns.len());
    }
    if let Some(n) = payload.get("relationships").and_then(Value::as_array).map(Vec::len) {
        return format!("{n} relationships");
    }
    "ok".to_owned()
}
