//! SQL safety guard.
//!
//! [`SafetyGuard::classify`] decides whether a statement may reach the
//! database. Whole-database destruction is refused outright. Ordinary
//! destructive statements (`DROP TABLE`, `DELETE`, ...) pass but carry a
//! warning for the trace. Unbounded `SELECT`s are capped.

use std::iter::Peekable;
use std::str::Chars;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use tracing::{info, warn};

/// Row cap appended to unbounded `SELECT`s.
pub const DEFAULT_ROW_CAP: u32 = 100;

static BLOCKED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(DROP|TRUNCATE)\s+(DATABASE|SCHEMA)\b").expect("valid blocklist pattern")
});

// Matched against single statements with comments removed. DML may sit
// behind a CTE prefix.
static DESTRUCTIVE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?is)^DROP\s+(?:TEMPORARY\s+)?(\w+)", "DROP"),
        (r"(?is)^TRUNCATE\b", "TRUNCATE"),
        (r"(?is)^(?:WITH\b.*\)\s*)?DELETE\b", "DELETE"),
        (r"(?is)^ALTER\s+TABLE\b.*\bDROP\b", "ALTER TABLE ... DROP"),
    ]
    .into_iter()
    .map(|(p, label)| (Regex::new(p).expect("valid destructive pattern"), label))
    .collect()
});

static UPDATE_STMT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(?:WITH\b.*\)\s*)?UPDATE\b").expect("valid update pattern")
});

static WHERE_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("valid where pattern"));

static LIMIT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+").expect("valid limit pattern"));

static INTO_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bINTO\b").expect("valid into pattern"));

/// `DESCRIBE tbl [column]`, the only `DESCRIBE` form that cannot wrap a statement.
static DESCRIBE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(DESCRIBE|DESC)\s+[\w.`]+(\s+[\w`%]+)?$").expect("valid describe pattern")
});

static LEADING_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\(*\s*([A-Za-z]+)").expect("valid keyword pattern"));

/// Outcome of [`SafetyGuard::classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed(GuardedStatement),
    Blocked(String),
}

/// A statement cleared for execution, possibly rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedStatement {
    /// The SQL to execute.
    pub sql: String,
    /// The cap appended by the guard, if it rewrote the statement.
    pub limit_applied: Option<u32>,
    /// Set for statements that destroy or rewrite data.
    pub warning: Option<String>,
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SafetyGuard {
    row_cap: u32,
}

impl Default for SafetyGuard {
    fn default() -> Self {
        Self::new(DEFAULT_ROW_CAP)
    }
}

impl SafetyGuard {
    pub fn new(row_cap: u32) -> Self {
        Self { row_cap: row_cap.max(1) }
    }

    pub fn row_cap(&self) -> u32 {
        self.row_cap
    }

    /// Classify `statement`. Deterministic and side-effect free apart from
    /// logging.
    ///
    /// Every statement of a multi-statement payload is checked. Only a
    /// single unbounded query is rewritten with a row cap.
    pub fn classify(&self, statement: &str) -> Verdict {
        let trimmed = statement.trim();
        let statements = split_statements(trimmed);
        if statements.is_empty() {
            return Verdict::Blocked("empty statement".to_owned());
        }

        let blocked = std::iter::once(trimmed)
            .chain(statements.iter().map(String::as_str))
            .find_map(|s| BLOCKED.find(s));
        if let Some(m) = blocked {
            let op = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
            warn!(operation = %op.to_uppercase(), "blocked whole-database operation");
            return Verdict::Blocked(format!(
                "{} is not permitted: whole-database operations are blocked",
                op.to_uppercase()
            ));
        }

        let warning = statements.iter().find_map(|s| destructive_warning(s));
        if let Some(w) = &warning {
            info!(warning = %w, "destructive statement allowed");
        }

        if let Some(sql) = self.capped(&statements) {
            return Verdict::Allowed(GuardedStatement {
                sql,
                limit_applied: Some(self.row_cap),
                warning,
            });
        }

        Verdict::Allowed(GuardedStatement {
            sql: trimmed.to_owned(),
            limit_applied: None,
            warning,
        })
    }

    /// The capped form of a lone query that has no top-level `LIMIT`.
    ///
    /// The cap is appended to the comment-free statement text, so a trailing
    /// comment cannot swallow it.
    fn capped(&self, statements: &[String]) -> Option<String> {
        let [only] = statements else {
            return None;
        };
        let needs_cap = match Parser::parse_sql(&MySqlDialect {}, only) {
            Ok(parsed) => match parsed.as_slice() {
                [Statement::Query(query)] => {
                    query.limit.is_none()
                        && query.fetch.is_none()
                        && query.locks.is_empty()
                        && query_is_read_only(query)
                }
                _ => false,
            },
            Err(_) => {
                leading_keyword(only).as_deref() == Some("SELECT")
                    && !LIMIT_CLAUSE.is_match(only)
                    && !INTO_CLAUSE.is_match(only)
            }
        };
        needs_cap.then(|| format!("{only} LIMIT {}", self.row_cap))
    }
}

fn destructive_warning(statement: &str) -> Option<String> {
    for (re, label) in DESTRUCTIVE.iter() {
        if let Some(caps) = re.captures(statement) {
            let what = match (*label, caps.get(1)) {
                ("DROP", Some(object)) => format!("DROP {}", object.as_str().to_uppercase()),
                (label, _) => label.to_owned(),
            };
            return Some(format!("destructive statement ({what}) modifies or removes data"));
        }
    }
    if UPDATE_STMT.is_match(statement) && !WHERE_CLAUSE.is_match(statement) {
        return Some("destructive statement (UPDATE without WHERE) rewrites every row".to_owned());
    }
    None
}

/// Split `sql` on `;` outside quotes, dropping comments.
///
/// The body of a MySQL executable comment (`/*! ... */`) is kept, since the
/// server runs it. Empty statements are skipped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;
    let mut in_executable = false;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' && q != '`' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                // MySQL only treats `--` as a comment when whitespace follows.
                let mut ahead = chars.clone();
                ahead.next();
                if ahead.peek().is_none_or(|n| n.is_whitespace()) {
                    skip_line(&mut chars);
                    current.push(' ');
                } else {
                    current.push(c);
                }
            }
            '#' => {
                skip_line(&mut chars);
                current.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'!') {
                    chars.next();
                    while chars.peek().is_some_and(char::is_ascii_digit) {
                        chars.next();
                    }
                    in_executable = true;
                } else {
                    skip_block_comment(&mut chars);
                }
                current.push(' ');
            }
            '*' if in_executable && chars.peek() == Some(&'/') => {
                chars.next();
                in_executable = false;
                current.push(' ');
            }
            ';' => finish_statement(&mut statements, &mut current),
            _ => current.push(c),
        }
    }
    finish_statement(&mut statements, &mut current);
    statements
}

fn skip_line(chars: &mut Peekable<Chars<'_>>) {
    for c in chars.by_ref() {
        if c == '\n' {
            break;
        }
    }
}

fn skip_block_comment(chars: &mut Peekable<Chars<'_>>) {
    let mut prev = '\0';
    for c in chars.by_ref() {
        if prev == '*' && c == '/' {
            break;
        }
        prev = c;
    }
}

fn finish_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_owned());
    }
    current.clear();
}

/// Upper-cased first keyword of `sql`, skipping opening parentheses.
pub fn leading_keyword(sql: &str) -> Option<String> {
    LEADING_KEYWORD
        .captures(sql)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
}

/// `true` when the statement only reads data.
///
/// Each statement is parsed and must be a query whose every body (CTEs,
/// set operations, nested queries) is a plain `SELECT` or `VALUES`, an
/// `EXPLAIN` of such a query, a table description or a `SHOW`. A statement
/// the parser rejects passes only as a `SHOW`, a `DESCRIBE tbl` or a
/// `SELECT` without `INTO`.
pub fn is_read_only(sql: &str) -> bool {
    let statements = split_statements(sql);
    !statements.is_empty() && statements.iter().all(|s| statement_text_is_read_only(s))
}

fn statement_text_is_read_only(statement: &str) -> bool {
    match Parser::parse_sql(&MySqlDialect {}, statement) {
        Ok(parsed) => !parsed.is_empty() && parsed.iter().all(statement_is_read_only),
        Err(_) => match leading_keyword(statement).as_deref() {
            Some("SHOW") => true,
            Some("DESCRIBE" | "DESC") => DESCRIBE_TABLE.is_match(statement),
            Some("SELECT") => !INTO_CLAUSE.is_match(statement),
            _ => false,
        },
    }
}

fn statement_is_read_only(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => query_is_read_only(query),
        Statement::Explain { statement, .. } => statement_is_read_only(statement),
        Statement::ExplainTable { .. } => true,
        other => leading_keyword(&other.to_string()).as_deref() == Some("SHOW"),
    }
}

fn query_is_read_only(query: &Query) -> bool {
    let ctes_read_only = query
        .with
        .as_ref()
        .is_none_or(|with| with.cte_tables.iter().all(|cte| query_is_read_only(&cte.query)));
    ctes_read_only && set_expr_is_read_only(&query.body)
}

fn set_expr_is_read_only(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => query_is_read_only(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_read_only(left) && set_expr_is_read_only(right)
        }
        SetExpr::Values(_) => true,
        _ => false,
    }
}

/// `true` for statements whose leading keyword produces a row set.
pub fn returns_rows_by_keyword(sql: &str) -> bool {
    matches!(
        leading_keyword(sql).as_deref(),
        Some("SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN")
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn allowed(v: Verdict) -> GuardedStatement {
        match v {
            Verdict::Allowed(s) => s,
            Verdict::Blocked(r) => panic!("unexpectedly blocked: {r}"),
        }
    }

    #[test]
    fn drop_database_is_blocked() {
        let guard = SafetyGuard::default();
        assert!(guard.classify("DROP DATABASE prod").is_blocked());
        assert!(guard.classify("  drop   database prod;").is_blocked());
        assert!(guard.classify("Truncate Database prod").is_blocked());
        assert!(guard.classify("DROP SCHEMA prod").is_blocked());
        assert!(guard.classify("SELECT 1; DROP DATABASE prod").is_blocked());
    }

    #[test]
    fn drop_table_is_allowed_with_warning() {
        let stmt = allowed(SafetyGuard::default().classify("DROP TABLE logs"));
        assert_eq!(stmt.sql, "DROP TABLE logs");
        assert_eq!(stmt.limit_applied, None);
        let warning = stmt.warning.expect("warning for DROP TABLE");
        assert!(warning.contains("DROP TABLE"), "{warning}");
    }

    #[test]
    fn delete_and_unbounded_update_are_flagged() {
        let guard = SafetyGuard::default();
        assert!(allowed(guard.classify("DELETE FROM logs WHERE id = 3")).warning.is_some());
        assert!(allowed(guard.classify("UPDATE users SET active = 0")).warning.is_some());
        assert!(allowed(guard.classify("UPDATE users SET active = 0 WHERE id = 1")).warning.is_none());
        assert!(allowed(guard.classify("INSERT INTO t VALUES (1)")).warning.is_none());
    }

    #[test]
    fn unbounded_select_gets_default_cap() {
        let stmt = allowed(SafetyGuard::default().classify("SELECT * FROM users"));
        assert_eq!(stmt.sql, "SELECT * FROM users LIMIT 100");
        assert_eq!(stmt.limit_applied, Some(100));
        assert!(stmt.warning.is_none());
    }

    #[test]
    fn trailing_semicolon_is_dropped_before_cap() {
        let stmt = allowed(SafetyGuard::new(25).classify("select id from users ;"));
        assert_eq!(stmt.sql, "select id from users LIMIT 25");
    }

    #[test]
    fn existing_limit_is_left_unchanged() {
        let stmt = allowed(SafetyGuard::default().classify("SELECT * FROM users LIMIT 10"));
        assert_eq!(stmt.sql, "SELECT * FROM users LIMIT 10");
        assert_eq!(stmt.limit_applied, None);
    }

    #[test]
    fn non_select_statements_are_not_capped() {
        let stmt = allowed(SafetyGuard::default().classify("SHOW TABLES"));
        assert_eq!(stmt.sql, "SHOW TABLES");
        assert_eq!(stmt.limit_applied, None);
    }

    #[test]
    fn classify_is_deterministic() {
        let guard = SafetyGuard::default();
        let sql = "WITH t AS (SELECT 1 AS x) SELECT x FROM t";
        assert_eq!(guard.classify(sql), guard.classify(sql));
    }

    #[test]
    fn empty_statement_is_blocked() {
        assert!(SafetyGuard::default().classify("   ").is_blocked());
    }

    #[test]
    fn read_only_detection() {
        assert!(is_read_only("SELECT * FROM users WHERE id = 1"));
        assert!(is_read_only("SHOW TABLES"));
        assert!(is_read_only("DESCRIBE users"));
        assert!(!is_read_only("DELETE FROM users"));
        assert!(!is_read_only("DROP TABLE users"));
        assert!(!is_read_only("SELECT 1; DELETE FROM users"));
    }

    #[test]
    fn hidden_whole_database_drop_is_blocked() {
        let guard = SafetyGuard::default();
        assert!(guard.classify("DROP/**/DATABASE prod").is_blocked());
        assert!(guard.classify("SELECT 1 /*!50000 ; DROP DATABASE prod */").is_blocked());
    }

    #[test]
    fn destructive_statements_are_flagged_anywhere_in_the_payload() {
        let guard = SafetyGuard::default();
        let warning = |sql: &str| allowed(guard.classify(sql)).warning.unwrap_or_default();

        assert!(warning("SELECT 1; DROP TABLE logs").contains("DROP TABLE"));
        assert!(warning("/* cleanup */ DROP TABLE logs").contains("DROP TABLE"));
        assert!(warning("WITH t AS (SELECT 1) DELETE FROM users").contains("DELETE"));
        assert!(warning("-- reset flags\nUPDATE users SET active = 0").contains("UPDATE without WHERE"));
        assert!(warning("SELECT 'DELETE FROM users' AS note").is_empty());
    }

    #[test]
    fn trailing_comment_does_not_swallow_the_cap() {
        let stmt = allowed(SafetyGuard::default().classify("SELECT * FROM users -- all users"));
        assert_eq!(stmt.sql, "SELECT * FROM users LIMIT 100");
        assert_eq!(stmt.limit_applied, Some(100));
    }

    #[test]
    fn only_the_top_level_limit_counts() {
        let guard = SafetyGuard::default();
        let stmt = allowed(guard.classify("SELECT * FROM (SELECT * FROM big LIMIT 5) a, big b"));
        assert_eq!(stmt.sql, "SELECT * FROM (SELECT * FROM big LIMIT 5) a, big b LIMIT 100");
        assert_eq!(stmt.limit_applied, Some(100));

        let stmt = allowed(guard.classify("SELECT * FROM notes WHERE body = 'LIMIT 5'"));
        assert_eq!(stmt.limit_applied, Some(100));
    }

    #[test]
    fn multi_statement_payloads_are_never_rewritten() {
        let stmt = allowed(SafetyGuard::default().classify("SELECT 1; SELECT * FROM users"));
        assert_eq!(stmt.sql, "SELECT 1; SELECT * FROM users");
        assert_eq!(stmt.limit_applied, None);
    }

    #[test]
    fn writes_behind_a_cte_are_not_capped() {
        let stmt = allowed(SafetyGuard::default().classify("WITH t AS (SELECT 1) DELETE FROM users"));
        assert_eq!(stmt.sql, "WITH t AS (SELECT 1) DELETE FROM users");
        assert_eq!(stmt.limit_applied, None);
    }

    #[test]
    fn writes_disguised_as_queries_are_not_read_only() {
        assert!(!is_read_only("WITH t AS (SELECT 1) DELETE FROM users"));
        assert!(!is_read_only("WITH t AS (SELECT 1) UPDATE users SET active = 0"));
        assert!(!is_read_only(
            "EXPLAIN ANALYZE DELETE u FROM users u JOIN orders o ON o.user_id = u.id"
        ));
        assert!(!is_read_only("SELECT 1 /*! ; DROP TABLE users */"));
        assert!(!is_read_only("DESCRIBE DELETE FROM users"));
    }

    #[test]
    fn plain_queries_stay_read_only() {
        assert!(is_read_only("WITH t AS (SELECT 1 AS x) SELECT x FROM t"));
        assert!(is_read_only("SELECT id FROM a UNION SELECT id FROM b"));
        assert!(is_read_only("EXPLAIN SELECT * FROM users"));
        assert!(is_read_only("SELECT * FROM users -- trailing; comment"));
    }

    #[test]
    fn splitting_respects_quotes_and_comments() {
        assert_eq!(
            split_statements("SELECT ';' AS a; -- done\n# also done\nSELECT `x;y` FROM t;"),
            vec!["SELECT ';' AS a", "SELECT `x;y` FROM t"]
        );
        assert_eq!(split_statements("SELECT 1 /* ; */ + 2"), vec!["SELECT 1   + 2"]);
        assert_eq!(split_statements("SELECT 5--3"), vec!["SELECT 5--3"]);
        assert!(split_statements(" -- nothing here ").is_empty());
    }
}
