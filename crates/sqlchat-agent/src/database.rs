//! The relational engine, consumed as an opaque "execute SQL" capability.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::normalize::Row;

/// Result of a single statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Affected { rows_affected: u64 },
}

impl QueryOutput {
    /// Rows of a row-returning statement; empty for DML.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Affected { .. } => Vec::new(),
        }
    }
}

/// Executes one already-classified statement. No transaction semantics are
/// expected beyond single-statement execution.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, DatabaseError>;
}
