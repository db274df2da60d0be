//! Turns the model's raw final text into display prose plus an optional
//! primary SQL statement.
//!
//! SQL is picked by precedence, first match wins:
//! 1. a fenced block tagged `sql` (or `mysql`),
//! 2. any fenced block whose body starts with a SQL keyword,
//! 3. an inline code span that starts with a SQL keyword.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::types::TraceEntry;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+.-]*)[^\n]*\n(.*?)```").expect("valid fence pattern")
});

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("valid inline code pattern"));

static SQL_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(SELECT|WITH|INSERT|UPDATE|DELETE|REPLACE|CREATE|ALTER|DROP|TRUNCATE|SHOW|DESCRIBE|DESC|EXPLAIN)\s",
    )
    .expect("valid sql keyword pattern")
});

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+(.*?)[ \t#]*$").expect("valid header pattern"));

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([ \t]*)[-*+][ \t]+").expect("valid bullet pattern"));

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*\n]+)\*\*|__([^_\n]+)__").expect("valid bold pattern"));

static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\s](?:[^*\n]*[^*\s])?)\*").expect("valid italic pattern"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").expect("valid link pattern"));

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid blank-line pattern"));

/// What the caller receives for one final answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assembled {
    pub text: String,
    pub sql: Option<String>,
    pub trace: Vec<TraceEntry>,
}

/// Split `raw` into display text and primary SQL; `trace` is passed through.
pub fn assemble(raw: &str, trace: Vec<TraceEntry>) -> Assembled {
    Assembled {
        text: display_text(raw),
        sql: extract_sql(raw),
        trace,
    }
}

fn looks_like_sql(code: &str) -> bool {
    SQL_START.is_match(code)
}

fn is_sql_tag(tag: &str) -> bool {
    tag.eq_ignore_ascii_case("sql") || tag.eq_ignore_ascii_case("mysql")
}

/// Primary SQL statement in `raw`, if any.
pub fn extract_sql(raw: &str) -> Option<String> {
    let fences: Vec<(&str, &str)> = FENCE
        .captures_iter(raw)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect();

    let tagged = fences
        .iter()
        .find(|(tag, body)| is_sql_tag(tag) && !body.trim().is_empty());
    let heuristic = || fences.iter().find(|(_, body)| looks_like_sql(body));

    if let Some((_, body)) = tagged.or_else(heuristic) {
        return Some(body.trim().to_owned());
    }

    let prose = FENCE.replace_all(raw, "");
    INLINE_CODE
        .captures_iter(&prose)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|code| looks_like_sql(code))
        .map(str::to_owned)
}

/// Prose with SQL fences removed and markdown reduced to plain markers.
pub fn display_text(raw: &str) -> String {
    let without_sql = FENCE.replace_all(raw, |c: &Captures<'_>| {
        let tag = c.get(1).map_or("", |m| m.as_str());
        let body = c.get(2).map_or("", |m| m.as_str());
        if is_sql_tag(tag) || looks_like_sql(body) {
            String::new()
        } else {
            body.trim_end().to_owned()
        }
    });

    let text = HEADER.replace_all(&without_sql, "$1");
    let text = BULLET.replace_all(&text, "${1}• ");
    let text = BOLD.replace_all(&text, "$1$2");
    let text = ITALIC.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1 ($2)");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tagged_block_is_extracted_verbatim_and_removed() {
        let raw = "Here you go:\n\n```sql\nSELECT id, email\nFROM users\nWHERE active = 1;\n```\n\nIt returns active users.";
        let out = assemble(raw, Vec::new());
        assert_eq!(out.sql.as_deref(), Some("SELECT id, email\nFROM users\nWHERE active = 1;"));
        assert_eq!(out.text, "Here you go:\n\nIt returns active users.");
    }

    #[test]
    fn tagged_block_wins_over_earlier_untagged_one() {
        let raw = "```\nSELECT 1\n```\nthen\n```SQL\nSELECT 2\n```";
        assert_eq!(extract_sql(raw).as_deref(), Some("SELECT 2"));
    }

    #[test]
    fn untagged_fence_is_used_when_it_looks_like_sql() {
        let raw = "```text\nnot sql\n```\n```\nselect * from orders\n```";
        assert_eq!(extract_sql(raw).as_deref(), Some("select * from orders"));
        assert_eq!(display_text(raw), "not sql");
    }

    #[test]
    fn inline_code_is_the_last_resort() {
        let raw = "Try `SELECT COUNT(*) FROM users` or look at `users`.";
        assert_eq!(extract_sql(raw).as_deref(), Some("SELECT COUNT(*) FROM users"));
        assert_eq!(display_text(raw), "Try SELECT COUNT(*) FROM users or look at users.");
    }

    #[test]
    fn prose_without_sql_yields_none() {
        assert_eq!(extract_sql("The database has two tables: users and orders."), None);
        assert_eq!(extract_sql("Use the `users` table to select rows."), None);
    }

    #[test]
    fn markdown_is_flattened() {
        let raw = "## Tables\n\n\n\n- **users**: accounts\n* *orders*: purchases\n\nSee [docs](https://example.com).";
        assert_eq!(
            display_text(raw),
            "Tables\n\n• users: accounts\n• orders: purchases\n\nSee docs (https://example.com)."
        );
    }

    #[test]
    fn arithmetic_asterisks_are_not_emphasis() {
        assert_eq!(display_text("2 * 3 * 4 = 24"), "2 * 3 * 4 = 24");
        assert_eq!(display_text("price * qty for *each* row"), "price * qty for each row");
        assert_eq!(display_text("*a*"), "a");
    }

    #[test]
    fn identifiers_with_underscores_survive() {
        assert_eq!(display_text("Column created_at in order_items"), "Column created_at in order_items");
    }

    #[test]
    fn trace_is_passed_through_untouched() {
        let trace = vec![TraceEntry::Thought { text: "look".into() }];
        assert_eq!(assemble("done", trace.clone()).trace, trace);
    }
}
