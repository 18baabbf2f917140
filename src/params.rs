//! Bind-parameter classification and rendering for `db.query_args`.

use std::fmt;

use chrono::{DateTime, Utc};
use sea_orm::{Statement, Value, Values};

/// A single bind-parameter value, reduced to the shapes the serializer
/// distinguishes.
///
/// Driver values are converted once at the instrumentation boundary; from
/// here on, rendering is a pure [`fmt::Display`] concern.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Rendered in RFC 3339 (ISO-8601) form.
    DateTime(DateTime<Utc>),
    /// Rendered as lowercase hex.
    Bytes(Vec<u8>),
    /// Rendered as `[a, b, c]`.
    List(Vec<ParamValue>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => f.write_str("NULL"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
            ParamValue::DateTime(v) => f.write_str(&v.to_rfc3339()),
            ParamValue::Bytes(v) => {
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            ParamValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&Value> for ParamValue {
    fn from(value: &Value) -> Self {
        if *value == value.as_null() {
            return ParamValue::Null;
        }
        match value {
            Value::Bool(Some(v)) => ParamValue::Bool(*v),
            Value::TinyInt(Some(v)) => ParamValue::Int(i64::from(*v)),
            Value::SmallInt(Some(v)) => ParamValue::Int(i64::from(*v)),
            Value::Int(Some(v)) => ParamValue::Int(i64::from(*v)),
            Value::BigInt(Some(v)) => ParamValue::Int(*v),
            Value::TinyUnsigned(Some(v)) => ParamValue::Int(i64::from(*v)),
            Value::SmallUnsigned(Some(v)) => ParamValue::Int(i64::from(*v)),
            Value::Unsigned(Some(v)) => ParamValue::Int(i64::from(*v)),
            Value::BigUnsigned(Some(v)) => ParamValue::Text(v.to_string()),
            Value::Float(Some(v)) => ParamValue::Float(f64::from(*v)),
            Value::Double(Some(v)) => ParamValue::Float(*v),
            Value::String(Some(v)) => ParamValue::Text(v.as_str().to_owned()),
            Value::Char(Some(v)) => ParamValue::Text(v.to_string()),
            Value::Bytes(Some(v)) => ParamValue::Bytes(v.as_ref().clone()),
            Value::ChronoDate(Some(v)) => ParamValue::Text(v.to_string()),
            Value::ChronoTime(Some(v)) => ParamValue::Text(v.to_string()),
            Value::ChronoDateTime(Some(v)) => ParamValue::DateTime(v.and_utc()),
            Value::ChronoDateTimeUtc(Some(v)) => ParamValue::DateTime(**v),
            Value::ChronoDateTimeLocal(Some(v)) => ParamValue::DateTime(v.with_timezone(&Utc)),
            Value::ChronoDateTimeWithTimeZone(Some(v)) => {
                ParamValue::DateTime(v.with_timezone(&Utc))
            }
            // Exotic driver types (json, uuid, arrays, ...) keep their debug form.
            other => ParamValue::Text(format!("{other:?}")),
        }
    }
}

/// The classified shape of a statement's bind parameters.
///
/// Classification happens exactly once, before any formatting: a parameter
/// set is absent, an ordered sequence, or a key-value mapping. The mapping
/// shape is a `Vec` of pairs so insertion order is structural rather than a
/// property of some map implementation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum QueryParams {
    #[default]
    None,
    Positional(Vec<ParamValue>),
    Named(Vec<(String, ParamValue)>),
}

impl QueryParams {
    /// Render the parameters as the flat, ordered `db.query_args` sequence.
    ///
    /// Positional values render in original order; named values render as
    /// `key=value` in insertion order; absent parameters render as an empty
    /// sequence. There are no error conditions.
    pub fn to_query_args(&self) -> Vec<String> {
        match self {
            QueryParams::None => Vec::new(),
            QueryParams::Positional(values) => {
                values.iter().map(ToString::to_string).collect()
            }
            QueryParams::Named(entries) => entries
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
        }
    }

    /// Extract the bind parameters carried by a SeaORM [`Statement`].
    pub fn from_statement(statement: &Statement) -> Self {
        match &statement.values {
            Some(values) => Self::from(values),
            None => QueryParams::None,
        }
    }
}

impl From<&Values> for QueryParams {
    fn from(values: &Values) -> Self {
        if values.0.is_empty() {
            QueryParams::None
        } else {
            QueryParams::Positional(values.0.iter().map(ParamValue::from).collect())
        }
    }
}

impl FromIterator<ParamValue> for QueryParams {
    fn from_iter<I: IntoIterator<Item = ParamValue>>(iter: I) -> Self {
        QueryParams::Positional(iter.into_iter().collect())
    }
}
