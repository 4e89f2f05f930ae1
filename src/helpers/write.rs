//! Bulk row insertion.

use serde::Serialize;
use tracing::debug;

use super::qualified_name;
use crate::client::Client;
use crate::db::{Params, Row};
use crate::error::{Error, Result};
use crate::logging::timed;

/// Default number of rows per `INSERT` statement.
pub const DEFAULT_CHUNK_SIZE: usize = 16_000;

/// Options for [`insert_rows`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Rows per statement, at least 1.
    pub chunk_size: usize,
    /// Truncate the table before inserting.
    pub overwrite: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overwrite: false,
        }
    }
}

/// What [`insert_rows`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// `INSERT` statements executed.
    pub chunks: usize,
    /// Rows inserted.
    pub rows: usize,
}

/// Inserts `rows` into `table` (name parts, e.g. `["DB", "PUBLIC", "T"]`).
///
/// Rows are sent as multi-row `INSERT ... VALUES` statements of at most
/// `chunk_size` rows with every value bound. Chunks are not wrapped in a
/// transaction: a failure leaves earlier chunks in place.
pub async fn insert_rows(
    client: &Client,
    table: &[&str],
    columns: &[&str],
    rows: &[Row],
    options: &WriteOptions,
) -> Result<WriteReport> {
    let table_name = qualified_name(table)?;
    if columns.is_empty() {
        return Err(Error::config("insert_rows needs at least one column"));
    }
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
        return Err(Error::config(format!(
            "Row {} has {} value(s) but {} column(s) were given",
            i,
            row.len(),
            columns.len()
        )));
    }
    let column_list = columns
        .iter()
        .map(|c| super::quote_identifier(c))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    if options.overwrite {
        timed(&format!("Truncate {table_name}"), async {
            client
                .execute(&format!("TRUNCATE TABLE {table_name}"), &Params::None)
                .await
        })
        .await?;
    }

    let row_placeholder = format!("({})", vec!["?"; columns.len()].join(", "));
    let mut report = WriteReport::default();

    timed(&format!("Insert {} row(s) into {table_name}", rows.len()), async {
        for chunk in rows.chunks(options.chunk_size.max(1)) {
            let sql = format!(
                "INSERT INTO {table_name} ({column_list}) VALUES {}",
                vec![row_placeholder.as_str(); chunk.len()].join(", ")
            );
            let params = Params::Positional(chunk.iter().flatten().cloned().collect());
            client.execute(&sql, &params).await?;

            report.chunks += 1;
            report.rows += chunk.len();
            debug!(chunk = report.chunks, rows = report.rows, "Inserted chunk");
        }
        Ok::<_, Error>(())
    })
    .await?;

    Ok(report)
}
