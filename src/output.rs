//! Rendering of query results for the CLI.

use snowlink::db::QueryResult;

/// Longest cell rendered in table output before truncation.
const MAX_CELL_WIDTH: usize = 60;

/// Renders `result` as an aligned text table followed by a row count line.
pub fn format_table(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return format!(
            "Statement executed in {:.3}s\n",
            result.execution_time.as_secs_f64()
        );
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|v| truncate(&v.to_display_string())).collect())
        .collect();

    let mut widths: Vec<usize> = result
        .columns
        .iter()
        .map(|c| c.name.chars().count())
        .collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let mut out = String::new();
    let header: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    push_line(&mut out, &header, &widths);
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&separator.join("-+-"));
    out.push('\n');
    for row in &cells {
        let row: Vec<&str> = row.iter().map(String::as_str).collect();
        push_line(&mut out, &row, &widths);
    }

    out.push_str(&format!(
        "({} row{}, {:.3}s)\n",
        result.row_count,
        if result.row_count == 1 { "" } else { "s" },
        result.execution_time.as_secs_f64()
    ));
    out
}

fn push_line(out: &mut String, cells: &[&str], widths: &[usize]) {
    let padded: Vec<String> = widths
        .iter()
        .enumerate()
        .map(|(i, width)| format!("{:<width$}", cells.get(i).copied().unwrap_or("")))
        .collect();
    out.push_str(padded.join(" | ").trim_end());
    out.push('\n');
}

fn truncate(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= MAX_CELL_WIDTH {
        return single_line;
    }
    let mut cut: String = single_line.chars().take(MAX_CELL_WIDTH - 1).collect();
    cut.push('…');
    cut
}

/// Renders `result` as pretty-printed JSON.
pub fn format_json(result: &QueryResult) -> serde_json::Result<String> {
    let columns: Vec<serde_json::Value> = result
        .columns
        .iter()
        .map(|c| serde_json::json!({ "name": c.name, "type": c.data_type }))
        .collect();
    let rows: Vec<serde_json::Value> = result
        .rows
        .iter()
        .map(|row| serde_json::Value::Array(row.iter().map(|v| v.to_json()).collect()))
        .collect();

    serde_json::to_string_pretty(&serde_json::json!({
        "columns": columns,
        "rows": rows,
        "row_count": result.row_count,
        "execution_time_ms": result.execution_time.as_millis() as u64,
    }))
}

/// Renders a one-column listing of names.
pub fn format_names(title: &str, names: &[String]) -> String {
    let mut out = format!("{title} ({})\n", names.len());
    for name in names {
        out.push_str("  ");
        out.push_str(name);
        out.push('\n');
    }
    out
}
