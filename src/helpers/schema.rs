//! Schema browsing over `SHOW` and `DESCRIBE`.
//!
//! Listings go through the memoizing reader, so repeated browsing of the
//! same level is served from memory for [`SCHEMA_TTL`].

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{qualified_name, quote_identifier};
use crate::cache::ReadOptions;
use crate::client::Client;
use crate::db::{Params, QueryResult, Value};
use crate::error::{Error, Result};

/// How long schema listings stay memoized.
pub const SCHEMA_TTL: Duration = Duration::from_secs(300);

/// One column of a described table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Columns of one table, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    /// Fully qualified, quoted table name.
    pub name: String,
    pub columns: Vec<TableColumn>,
}

impl TableDescription {
    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Human-readable listing, one column per line.
    pub fn format_for_display(&self) -> String {
        let mut out = format!("Table: {}\n", self.name);
        for column in &self.columns {
            let _ = writeln!(
                out,
                "  {} {}{}",
                column.name,
                column.data_type,
                if column.nullable { "" } else { " NOT NULL" }
            );
        }
        out
    }
}

async fn show(client: &Client, sql: &str) -> Result<Vec<String>> {
    let result = client
        .read(sql, &Params::None, &ReadOptions::with_ttl(SCHEMA_TTL))
        .await?;
    names_column(&result, sql)
}

fn names_column(result: &QueryResult, sql: &str) -> Result<Vec<String>> {
    let index = result
        .column_index("name")
        .ok_or_else(|| Error::internal(format!("'{sql}' returned no name column")))?;
    Ok(result.column_strings(index))
}

/// Databases visible to the current role.
pub async fn list_databases(client: &Client) -> Result<Vec<String>> {
    show(client, "SHOW DATABASES").await
}

/// Schemas in `database`.
pub async fn list_schemas(client: &Client, database: &str) -> Result<Vec<String>> {
    let sql = format!("SHOW SCHEMAS IN DATABASE {}", quote_identifier(database)?);
    show(client, &sql).await
}

/// Tables in `database.schema`.
pub async fn list_tables(client: &Client, database: &str, schema: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SHOW TABLES IN SCHEMA {}",
        qualified_name(&[database, schema])?
    );
    show(client, &sql).await
}

/// Columns of `database.schema.table`.
pub async fn describe_table(
    client: &Client,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<TableDescription> {
    let name = qualified_name(&[database, schema, table])?;
    let sql = format!("DESCRIBE TABLE {name}");
    let result = client
        .read(&sql, &Params::None, &ReadOptions::with_ttl(SCHEMA_TTL))
        .await?;

    let name_idx = result
        .column_index("name")
        .ok_or_else(|| Error::internal("DESCRIBE TABLE returned no name column"))?;
    let type_idx = result.column_index("type");
    let null_idx = result.column_index("null?");

    let columns = result
        .rows
        .iter()
        .map(|row| {
            let text = |idx: Option<usize>| {
                idx.and_then(|i| row.get(i))
                    .filter(|v| !v.is_null())
                    .map(Value::to_display_string)
            };
            TableColumn {
                name: text(Some(name_idx)).unwrap_or_default(),
                data_type: text(type_idx).unwrap_or_default(),
                nullable: text(null_idx).map_or(true, |n| n.eq_ignore_ascii_case("Y")),
            }
        })
        .collect();

    Ok(TableDescription { name, columns })
}

/// A `SELECT` over `columns` (all columns when empty) of the given table.
pub fn select_snippet(
    database: &str,
    schema: &str,
    table: &str,
    columns: &[&str],
) -> Result<String> {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ")
    };
    Ok(format!(
        "SELECT {projection} FROM {}",
        qualified_name(&[database, schema, table])?
    ))
}
