//! Tool catalogue, SQL safeguarding and tool dispatch for the Agent Loop
//! (spec §4.4). Declarations are plain data (`ToolSpec`), matching the
//! teacher's pattern of registering capabilities as inspectable structs
//! rather than hardcoding behaviour in the provider
//! (`brain-cognitive::conversation::traits::ToolDescriptor`).

use std::sync::Arc;

use chatsql_core::{ArtifactStore, QueryExecutor};
use chatsql_types::model::{ChartDescriptor, ChartType, SqlResult};
use chatsql_types::{ChatSqlError, Result};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::permissions::{RUN_SQL, VISUALIZE_DATA};

const DISALLOWED_KEYWORDS: &[&str] = &["DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "PRAGMA", "ATTACH"];
const PREVIEW_ROW_LIMIT: usize = 20;

pub fn catalogue() -> Vec<chatsql_core::ToolSpec> {
    vec![
        chatsql_core::ToolSpec {
            name: RUN_SQL.to_string(),
            description: "Execute a read-only SELECT query against the dataset and return a \
                preview of the results."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string", "description": "A single SELECT statement." }
                },
                "required": ["sql"]
            }),
        },
        chatsql_core::ToolSpec {
            name: VISUALIZE_DATA.to_string(),
            description: "Build a chart descriptor for a previously executed query's results, \
                identified by its file hash."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "fileHash": { "type": "string" },
                    "chartTypeHint": {
                        "type": "string",
                        "enum": ["line", "bar", "pie", "scatter", "table"]
                    }
                },
                "required": ["fileHash"]
            }),
        },
    ]
}

/// Validates a `run_sql` argument before it ever reaches the `QueryExecutor`.
/// Returns the violation reason, which becomes a recoverable tool-role
/// error string so the LLM can retry with a corrected statement.
pub fn safeguard_sql(sql: &str) -> std::result::Result<(), String> {
    let trimmed = sql.trim_start();
    let upper = trimmed.to_uppercase();

    if !upper.starts_with("SELECT") {
        return Err("SQL must start with SELECT".to_string());
    }
    if !upper.contains("FROM") {
        return Err("SQL must contain a FROM clause".to_string());
    }
    for keyword in DISALLOWED_KEYWORDS {
        if contains_word(&upper, keyword) {
            return Err(format!("SQL must not contain the keyword {keyword}"));
        }
    }
    Ok(())
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == word)
}

/// Executes `sql` through `executor`, materializes the full result set to
/// `artifacts` keyed by a content hash, and returns the preview descriptor
/// the LLM sees.
pub async fn run_sql(executor: &Arc<dyn QueryExecutor>, artifacts: &Arc<dyn ArtifactStore>, sql: &str) -> Result<SqlResult> {
    let executed = executor.execute(sql).await?;
    let file_hash = content_hash(sql, &executed.columns, &executed.rows);
    artifacts.write_csv(&file_hash, &executed.columns, &executed.rows).await?;

    let preview = executed.rows.iter().take(PREVIEW_ROW_LIMIT).cloned().collect();
    Ok(SqlResult {
        row_count: executed.rows.len(),
        columns: executed.columns,
        file_hash,
        preview,
    })
}

/// Builds a chart descriptor for the most recently materialized result
/// without re-reading the CSV; `columns` comes from the in-flight
/// `SqlResult` the loop is holding for `file_hash`.
pub fn visualize_data(file_hash: &str, columns: &[String], chart_type_hint: Option<&str>) -> Result<ChartDescriptor> {
    if columns.is_empty() {
        return Err(ChatSqlError::Validation(format!(
            "no columns recorded for file hash {file_hash}"
        )));
    }

    let chart_type = match chart_type_hint.map(str::to_lowercase).as_deref() {
        Some("line") => ChartType::Line,
        Some("bar") => ChartType::Bar,
        Some("pie") => ChartType::Pie,
        Some("scatter") => ChartType::Scatter,
        Some("table") => ChartType::Table,
        _ => infer_chart_type(columns),
    };

    let x_key = columns[0].clone();
    let y_key = columns.get(1).cloned().unwrap_or_else(|| x_key.clone());

    Ok(ChartDescriptor {
        chart_type,
        title: format!("{y_key} by {x_key}"),
        x_key,
        y_key,
    })
}

fn infer_chart_type(columns: &[String]) -> ChartType {
    let looks_temporal = columns
        .iter()
        .any(|c| ["date", "time", "month", "year", "day"].iter().any(|kw| c.to_lowercase().contains(kw)));
    if looks_temporal {
        ChartType::Line
    } else if columns.len() <= 2 {
        ChartType::Bar
    } else {
        ChartType::Table
    }
}

fn content_hash(sql: &str, columns: &[String], rows: &[Vec<serde_json::Value>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hasher.update(columns.join(",").as_bytes());
    if let Ok(serialized) = serde_json::to_vec(rows) {
        hasher.update(&serialized);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_select() {
        assert!(safeguard_sql("SELECT region, sum(revenue) FROM sales GROUP BY region").is_ok());
    }

    #[test]
    fn rejects_statements_missing_select() {
        assert!(safeguard_sql("WITH t AS (SELECT 1) SELECT * FROM t").is_err());
    }

    #[test]
    fn rejects_statements_without_from() {
        assert!(safeguard_sql("SELECT 1").is_err());
    }

    #[test]
    fn rejects_disallowed_keywords_even_mid_statement() {
        assert!(safeguard_sql("SELECT * FROM sales; DROP TABLE sales").is_err());
        assert!(safeguard_sql("SELECT * FROM sales WHERE region = 'dropzone'").is_ok());
    }

    #[test]
    fn infers_line_chart_for_temporal_columns() {
        let columns = vec!["order_date".to_string(), "revenue".to_string()];
        let chart = visualize_data("abc", &columns, None).unwrap();
        assert_eq!(chart.chart_type, ChartType::Line);
        assert_eq!(chart.x_key, "order_date");
        assert_eq!(chart.y_key, "revenue");
    }

    #[test]
    fn explicit_hint_overrides_inference() {
        let columns = vec!["region".to_string(), "revenue".to_string()];
        let chart = visualize_data("abc", &columns, Some("pie")).unwrap();
        assert_eq!(chart.chart_type, ChartType::Pie);
    }
}
