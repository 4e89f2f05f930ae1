//! Convenience operations built on [`Client`](crate::client::Client).
//!
//! Snowflake cannot bind identifiers, so database, schema, table and column
//! names are validated and quoted here before they reach SQL text. Values
//! are always bound.

pub mod schema;
pub mod write;

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

fn simple_identifier() -> &'static Regex {
    static SIMPLE: OnceLock<Regex> = OnceLock::new();
    SIMPLE.get_or_init(|| Regex::new(r"^[A-Z_][A-Z0-9_$]*$").expect("valid identifier regex"))
}

/// Snowflake reserved keywords. These cannot appear bare as object names.
const RESERVED: &[&str] = &[
    "ACCOUNT", "ALL", "ALTER", "AND", "ANY", "AS", "BETWEEN", "BY", "CASE", "CAST", "CHECK",
    "COLUMN", "CONNECT", "CONNECTION", "CONSTRAINT", "CREATE", "CROSS", "CURRENT",
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "DATABASE", "DELETE",
    "DISTINCT", "DROP", "ELSE", "EXISTS", "FALSE", "FOLLOWING", "FOR", "FROM", "FULL", "GRANT",
    "GROUP", "GSCLUSTER", "HAVING", "ILIKE", "IN", "INCREMENT", "INNER", "INSERT", "INTERSECT",
    "INTO", "IS", "ISSUE", "JOIN", "LATERAL", "LEFT", "LIKE", "LOCALTIME", "LOCALTIMESTAMP",
    "MINUS", "NATURAL", "NOT", "NULL", "OF", "ON", "OR", "ORDER", "ORGANIZATION", "QUALIFY",
    "REGEXP", "REVOKE", "RIGHT", "RLIKE", "ROW", "ROWS", "SAMPLE", "SCHEMA", "SELECT", "SET",
    "SOME", "START", "TABLE", "TABLESAMPLE", "THEN", "TO", "TRIGGER", "TRUE", "TRY_CAST",
    "UNION", "UNIQUE", "UPDATE", "USING", "VALUES", "VIEW", "WHEN", "WHENEVER", "WHERE", "WITH",
];

/// Renders `name` as a SQL identifier that resolves to exactly `name`.
///
/// Snowflake folds bare identifiers to upper case, so only upper-case,
/// non-reserved names are left bare. Anything else is double-quoted with
/// embedded quotes doubled. Names returned by `SHOW` round-trip unchanged.
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::config("Identifier must not be empty"));
    }
    if name.contains('\0') {
        return Err(Error::config(format!("Invalid identifier {name:?}")));
    }
    if simple_identifier().is_match(name) && !RESERVED.contains(&name) {
        Ok(name.to_string())
    } else {
        Ok(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// Joins quoted parts with dots: `db.schema.table`.
pub fn qualified_name(parts: &[&str]) -> Result<String> {
    if parts.is_empty() {
        return Err(Error::config("Object name must not be empty"));
    }
    Ok(parts
        .iter()
        .map(|p| quote_identifier(p))
        .collect::<Result<Vec<_>>>()?
        .join("."))
}
