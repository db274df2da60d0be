//! The closed set of database tools offered to the model.
//!
//! [`ToolName`] enumerates the tools, each with a fixed [`ParamSpec`] list
//! from which both the advertised JSON schema and argument validation are
//! derived. [`ToolRegistry`] executes them against a [`crate::Database`].

mod registry;

pub(crate) use registry::summarize;
pub use registry::{ToolExecution, ToolOptions, ToolRegistry};

use serde::Serialize;
use serde_json::{Map, Value, json};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::ToolError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ToolName {
    ListTables,
    DescribeTable,
    PreviewTableData,
    ExecuteSelectQuery,
    FindRelationships,
    /// Runs any statement the guard allows, including DML and `DROP TABLE`.
    ExecuteStatement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    pub description: &'static str,
}

impl ParamSpec {
    fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            minimum: None,
            maximum: None,
            description,
        }
    }

    fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Tool declaration as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object.
    pub parameters: Value,
}

impl ToolName {
    pub fn description(self) -> &'static str {
        match self {
            ToolName::ListTables => "List every table in the connected database.",
            ToolName::DescribeTable => {
                "Describe a table's columns: name, type, whether it is nullable, and its default."
            }
            ToolName::PreviewTableData => "Return the first rows of a table to see what the data looks like.",
            ToolName::ExecuteSelectQuery => {
                "Run a read-only SQL query (SELECT, SHOW, DESCRIBE, EXPLAIN). \
                 Queries without LIMIT are capped automatically."
            }
            ToolName::FindRelationships => {
                "List foreign-key relationships, optionally only those touching one table."
            }
            ToolName::ExecuteStatement => {
                "Run a data-modifying SQL statement (INSERT, UPDATE, DELETE, DDL). \
                 Use only when the user explicitly asks to change data."
            }
        }
    }

    /// Parameter list. `preview_max` bounds `preview_table_data.limit`.
    pub fn params(self, preview_default: u32, preview_max: u32) -> Vec<ParamSpec> {
        match self {
            ToolName::ListTables => Vec::new(),
            ToolName::DescribeTable => vec![ParamSpec::required(
                "table_name",
                ParamKind::String,
                "Name of the table to describe.",
            )],
            ToolName::PreviewTableData => vec![
                ParamSpec::required("table_name", ParamKind::String, "Name of the table to preview."),
                ParamSpec {
                    default: Some(json!(preview_default)),
                    minimum: Some(1),
                    maximum: Some(i64::from(preview_max)),
                    ..ParamSpec::optional("limit", ParamKind::Integer, "Number of rows to return.")
                },
            ],
            ToolName::ExecuteSelectQuery => vec![ParamSpec::required(
                "sql",
                ParamKind::String,
                "A single read-only SQL statement.",
            )],
            ToolName::FindRelationships => vec![ParamSpec::optional(
                "table_name",
                ParamKind::String,
                "Only return relationships from or to this table.",
            )],
            ToolName::ExecuteStatement => vec![ParamSpec::required(
                "sql",
                ParamKind::String,
                "A single SQL statement.",
            )],
        }
    }

    pub fn spec(self, preview_default: u32, preview_max: u32) -> ToolSpec {
        let params = self.params(preview_default, preview_max);
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &params {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(p.kind.json_type()));
            prop.insert("description".into(), json!(p.description));
            if let Some(d) = &p.default {
                prop.insert("default".into(), d.clone());
            }
            if let Some(min) = p.minimum {
                prop.insert("minimum".into(), json!(min));
            }
            if let Some(max) = p.maximum {
                prop.insert("maximum".into(), json!(max));
            }
            properties.insert(p.name.into(), Value::Object(prop));
            if p.required {
                required.push(p.name);
            }
        }
        ToolSpec {
            name: self.to_string(),
            description: self.description().to_owned(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            }),
        }
    }
}

/// Validated argument object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Map<String, Value>);

impl Args {
    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }
}

/// Check `raw` against `params`: presence of required arguments, types, and
/// bounds. Defaults are filled in; integers given as numeric strings are
/// accepted; out-of-range integers are clamped.
pub fn validate_args(params: &[ParamSpec], raw: &Value) -> Result<Args, ToolError> {
    let input = match raw {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        Value::String(s) if s.trim().is_empty() => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(ToolError::Validation(
                    "arguments must be a JSON object".to_owned(),
                ));
            }
        },
        _ => {
            return Err(ToolError::Validation(
                "arguments must be a JSON object".to_owned(),
            ));
        }
    };

    let mut out = Map::new();
    for p in params {
        let value = input.get(p.name).filter(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        });

        let Some(value) = value else {
            if p.required {
                return Err(ToolError::Validation(format!(
                    "missing required argument '{}'",
                    p.name
                )));
            }
            if let Some(d) = &p.default {
                out.insert(p.name.into(), d.clone());
            }
            continue;
        };

        let checked = match p.kind {
            ParamKind::String => match value {
                Value::String(s) => Value::String(s.trim().to_owned()),
                _ => {
                    return Err(ToolError::Validation(format!(
                        "argument '{}' must be a string",
                        p.name
                    )));
                }
            },
            ParamKind::Integer => {
                let n = match value {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                let Some(mut n) = n else {
                    return Err(ToolError::Validation(format!(
                        "argument '{}' must be an integer",
                        p.name
                    )));
                };
                if let Some(min) = p.minimum {
                    n = n.max(min);
                }
                if let Some(max) = p.maximum {
                    n = n.min(max);
                }
                Value::from(n)
            }
        };
        out.insert(p.name.into(), checked);
    }
    Ok(Args(out))
}
