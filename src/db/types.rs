//! Query result and bind parameter types for snowlink.
//!
//! Defines the structures used to represent query results from the warehouse
//! and the parameters bound into statements.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Represents the result of executing a SQL query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column metadata for the result set.
    pub columns: Vec<ColumnInfo>,

    /// Rows of data.
    pub rows: Vec<Row>,

    /// Time taken to execute the query.
    #[serde(with = "duration_serde")]
    pub execution_time: Duration,

    /// Number of rows in the result.
    pub row_count: usize,
}

impl QueryResult {
    /// Creates a new empty query result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query result with the given columns and rows.
    pub fn with_data(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            execution_time: Duration::ZERO,
            row_count,
        }
    }

    /// Sets the execution time.
    pub fn with_execution_time(mut self, duration: Duration) -> Self {
        self.execution_time = duration;
        self
    }

    /// Returns true if the result set is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the index of the column with the given name (case-insensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Collects the string form of one column across all rows.
    pub fn column_strings(&self, index: usize) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(index))
            .map(Value::to_display_string)
            .collect()
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Column data type.
    pub data_type: String,
}

impl ColumnInfo {
    /// Creates a new column info with the given name and type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A row of data from a query result.
pub type Row = Vec<Value>;

/// Represents a single value from, or bound into, a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text/string value.
    String(String),

    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Attempts to convert the value to a string representation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }

    /// Converts the value into a plain JSON value for output.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => {
                serde_json::Value::String(b.iter().map(|byte| format!("{byte:02x}")).collect())
            }
        }
    }

    /// Parses a CLI-style literal: `null`, `true`/`false`, integers, floats,
    /// otherwise a string.
    pub fn parse_literal(s: &str) -> Self {
        match s {
            "null" | "NULL" => Value::Null,
            "true" | "TRUE" => Value::Bool(true),
            "false" | "FALSE" => Value::Bool(false),
            _ => {
                if let Ok(i) = s.parse::<i64>() {
                    Value::Int(i)
                } else if let Ok(f) = s.parse::<f64>() {
                    if f.is_finite() {
                        Value::Float(f)
                    } else {
                        Value::String(s.to_string())
                    }
                } else {
                    Value::String(s.to_string())
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

// Conversion implementations for common types
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Bind parameters for a statement.
///
/// Parameters always travel to the driver separately from the SQL text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Params {
    /// No parameters.
    #[default]
    None,
    /// Positional parameters matched against `?` placeholders.
    Positional(Vec<Value>),
    /// Named parameters matched against `:name` placeholders.
    Named(BTreeMap<String, Value>),
}

impl Params {
    /// Builds positional params from anything convertible to values.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Builds named params from `(name, value)` pairs.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns true when no values are bound.
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(map) => map.is_empty(),
        }
    }

    /// Number of bound values.
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
            Params::Named(map) => map.len(),
        }
    }

    /// Stable JSON encoding used for hashing. Named params are emitted in
    /// key order.
    pub fn canonical_json(&self) -> String {
        let value = match self {
            Params::None => serde_json::Value::Null,
            Params::Positional(values) => {
                serde_json::Value::Array(values.iter().map(tagged_json).collect())
            }
            Params::Named(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), tagged_json(v)))
                    .collect(),
            ),
        };
        value.to_string()
    }
}

/// JSON form that keeps the type tag so `1` and `"1"` hash differently.
fn tagged_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Serde support for Duration (not natively supported by serde).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_nanos().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u128::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos as u64))
    }
}
