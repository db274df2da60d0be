//! Conversion of database column values into JSON-safe primitives.
//!
//! Drivers hand back values that JSON cannot carry directly: arbitrary
//! precision decimals, calendar types, raw bytes. [`normalize`] maps every
//! [`DbValue`] onto a [`serde_json::Value`] and never fails. Kinds without a
//! natural JSON form degrade to their string representation and are logged.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Number, Value};
use tracing::warn;

/// A single column value as produced by a [`crate::Database`].
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    /// Arbitrary-precision decimal in its textual form, e.g. `"12.50"`.
    Decimal(String),
    Date(NaiveDate),
    /// Timezone-less timestamp.
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Time(NaiveTime),
    Bytes(Vec<u8>),
    List(Vec<DbValue>),
    /// Keyed mapping; insertion order is preserved.
    Map(Vec<(String, DbValue)>),
    /// A driver value of a kind this crate does not model.
    Other { type_name: String, repr: String },
}

/// One result row: column name and value pairs in select-list order.
pub type Row = Vec<(String, DbValue)>;

/// Normalize a value into a JSON-compatible form.
///
/// Decimals become floating-point numbers (precision loss is accepted),
/// calendar values become ISO-8601 strings and bytes are decoded as lossy
/// UTF-8. Sequences and mappings are normalized element-wise.
pub fn normalize(value: &DbValue) -> Value {
    match value {
        DbValue::Null => Value::Null,
        DbValue::Bool(b) => Value::Bool(*b),
        DbValue::Int(i) => Value::from(*i),
        DbValue::UInt(u) => Value::from(*u),
        DbValue::Float(f) => float_or_fallback(*f, "float"),
        DbValue::Text(s) => Value::String(s.clone()),
        DbValue::Decimal(s) => match s.trim().parse::<f64>() {
            Ok(f) => float_or_fallback(f, "decimal"),
            Err(_) => fallback("decimal", s.clone()),
        },
        DbValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        DbValue::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        DbValue::Timestamp(ts) => {
            Value::String(ts.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
        }
        DbValue::Time(t) => Value::String(t.format("%H:%M:%S").to_string()),
        DbValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        DbValue::List(items) => Value::Array(items.iter().map(normalize).collect()),
        DbValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        DbValue::Other { type_name, repr } => fallback(type_name, repr.clone()),
    }
}

/// Normalize a row into a JSON object keyed by column name.
pub fn normalize_row(row: &Row) -> Map<String, Value> {
    row.iter()
        .map(|(column, value)| (column.clone(), normalize(value)))
        .collect()
}

/// Normalize a row set into a JSON array of objects.
pub fn normalize_rows(rows: &[Row]) -> Value {
    Value::Array(rows.iter().map(|r| Value::Object(normalize_row(r))).collect())
}

fn float_or_fallback(f: f64, kind: &str) -> Value {
    match Number::from_f64(f) {
        Some(n) => Value::Number(n),
        None => fallback(kind, f.to_string()),
    }
}

fn fallback(kind: &str, repr: String) -> Value {
    warn!(kind, repr = %repr, "value has no JSON form; falling back to string");
    Value::String(repr)
}

impl From<Value> for DbValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => DbValue::Null,
            Value::Bool(b) => DbValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DbValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    DbValue::UInt(u)
                } else {
                    DbValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => DbValue::Text(s),
            Value::Array(items) => DbValue::List(items.into_iter().map(DbValue::from).collect()),
            Value::Object(map) => {
                DbValue::Map(map.into_iter().map(|(k, v)| (k, DbValue::from(v))).collect())
            }
        }
    }
}

impl From<&str> for DbValue {
    fn from(s: &str) -> Self {
        DbValue::Text(s.to_owned())
    }
}

impl From<String> for DbValue {
    fn from(s: String) -> Self {
        DbValue::Text(s)
    }
}

impl From<i64> for DbValue {
    fn from(i: i64) -> Self {
        DbValue::Int(i)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn every_kind() -> Vec<DbValue> {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let time = NaiveTime::from_hms_opt(13, 5, 9).unwrap();
        vec![
            DbValue::Null,
            DbValue::Bool(true),
            DbValue::Int(-7),
            DbValue::UInt(u64::MAX),
            DbValue::Float(1.5),
            DbValue::Float(f64::INFINITY),
            DbValue::Text("hello".into()),
            DbValue::Decimal("19.99".into()),
            DbValue::Decimal("not-a-number".into()),
            DbValue::Date(date),
            DbValue::DateTime(date.and_time(time)),
            DbValue::Timestamp(date.and_time(time).and_utc()),
            DbValue::Time(time),
            DbValue::Bytes(vec![0x68, 0x69, 0xff]),
            DbValue::List(vec![DbValue::Int(1), DbValue::Decimal("2.5".into())]),
            DbValue::Map(vec![
                ("b".into(), DbValue::Date(date)),
                ("a".into(), DbValue::Null),
            ]),
            DbValue::Other {
                type_name: "GEOMETRY".into(),
                repr: "POINT(1 2)".into(),
            },
        ]
    }

    #[test]
    fn decimals_become_floats() {
        assert_eq!(normalize(&DbValue::Decimal("12.50".into())), json!(12.5));
    }

    #[test]
    fn calendar_values_are_iso_8601() {
        let date = NaiveDate::from_ymd_opt(2023, 7, 4).unwrap();
        let dt = date.and_hms_opt(8, 30, 0).unwrap();
        assert_eq!(normalize(&DbValue::Date(date)), json!("2023-07-04"));
        assert_eq!(normalize(&DbValue::DateTime(dt)), json!("2023-07-04T08:30:00"));
        assert_eq!(
            normalize(&DbValue::Timestamp(dt.and_utc())),
            json!("2023-07-04T08:30:00")
        );
    }

    #[test]
    fn invalid_utf8_bytes_are_replaced() {
        let v = normalize(&DbValue::Bytes(vec![b'o', b'k', 0xc3, 0x28]));
        assert_eq!(v, json!("ok\u{fffd}("));
    }

    #[test]
    fn nested_containers_keep_order_and_keys() {
        let v = normalize(&DbValue::Map(vec![
            ("zeta".into(), DbValue::List(vec![DbValue::Null, DbValue::Decimal("1".into())])),
            ("alpha".into(), DbValue::Bytes(b"x".to_vec())),
        ]));
        let keys: Vec<&str> = v.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(v["zeta"], json!([null, 1.0]));
        assert_eq!(v["alpha"], json!("x"));
    }

    #[test]
    fn normalize_is_idempotent_for_every_kind() {
        for value in every_kind() {
            let once = normalize(&value);
            let twice = normalize(&DbValue::from(once.clone()));
            assert_eq!(once, twice, "not idempotent for {value:?}");
        }
    }

    #[test]
    fn rows_keep_select_list_order() {
        let row: Row = vec![
            ("id".into(), DbValue::Int(1)),
            ("created".into(), DbValue::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap())),
        ];
        let v = normalize_rows(&[row]);
        assert_eq!(v, json!([{ "id": 1, "created": "2020-01-02" }]));
        let keys: Vec<&String> = v[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["id", "created"]);
    }

    #[test]
    #[traced_test]
    fn unsupported_kind_degrades_to_string_and_logs() {
        let v = normalize(&DbValue::Other {
            type_name: "GEOMETRY".into(),
            repr: "POINT(1 2)".into(),
        });
        assert_eq!(v, json!("POINT(1 2)"));
        assert!(logs_contain("falling back to string"));
    }
}
