//! Result materialization - typed, size-bounded payloads from query results
//!
//! Executes generated SQL over the simple-query protocol (every cell arrives
//! in text form, like the original wire contract) and converts the result set
//! into a field-keyed mapping of typed values. Materialization is bounded:
//! the instant the row cap is reached the outcome is flagged as truncated and
//! the partial payload is returned for caller inspection, not discarded.

use crate::error::{NlqError, NlqResult};
use indexmap::IndexMap;
use serde::Serialize;
use std::time::Duration;
use tokio_postgres::{Client, SimpleQueryMessage};

/// Cell length above which numeric parsing is skipped entirely
const NUMERIC_PARSE_LIMIT: usize = 64;

/// One materialized cell. The type is decided per value, not per column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Field name -> ordered values, in the query's column order
pub type ResultData = IndexMap<String, Vec<CellValue>>;

/// Outcome of executing and materializing one statement
#[derive(Debug)]
pub struct MaterializedResult {
    /// `None` for a non-data-returning execution (DDL/DML)
    pub data: Option<ResultData>,
    /// The row cap was hit; `data` holds exactly `max_rows` values per field
    pub truncated: bool,
}

/// Classify one raw cell. Short values get an integer parse, then a float
/// parse; anything longer than the limit stays text (large numeric-looking
/// blobs are not worth parsing and must not be misclassified).
pub fn parse_cell(raw: &str) -> CellValue {
    if raw.len() <= NUMERIC_PARSE_LIMIT {
        if let Ok(value) = raw.parse::<i64>() {
            return CellValue::Int(value);
        }
        if let Ok(value) = raw.parse::<f64>() {
            return CellValue::Float(value);
        }
    }
    CellValue::Text(raw.to_string())
}

/// Execute `sql` and materialize its result, capping rows per field.
/// An execution error carries the offending SQL for diagnostics.
pub async fn execute_and_materialize(
    client: &Client,
    sql: &str,
    max_rows: usize,
    query_timeout: Duration,
) -> NlqResult<MaterializedResult> {
    let exec = tokio::time::timeout(query_timeout, client.simple_query(sql));
    let messages = match exec.await {
        Ok(Ok(messages)) => messages,
        Ok(Err(e)) => return Err(NlqError::db(e.to_string(), sql)),
        Err(_) => return Err(NlqError::db("query timed out", sql)),
    };
    Ok(materialize(&messages, max_rows))
}

/// Convert a simple-query response into the typed payload. A response with
/// no row messages is the DDL/DML case: success, no data.
pub fn materialize(messages: &[SimpleQueryMessage], max_rows: usize) -> MaterializedResult {
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut overflowed = false;

    for message in messages {
        let row = match message {
            SimpleQueryMessage::Row(row) => row,
            _ => continue,
        };
        if columns.is_empty() {
            columns = row.columns().iter().map(|c| c.name().to_string()).collect();
        }
        if rows.len() == max_rows {
            // Stop reading the moment the cap is exceeded
            overflowed = true;
            break;
        }
        rows.push(
            (0..row.len())
                .map(|idx| row.get(idx).unwrap_or("").to_string())
                .collect(),
        );
    }

    if columns.is_empty() {
        return MaterializedResult {
            data: None,
            truncated: false,
        };
    }
    let mut result = materialize_rows(&columns, rows, max_rows);
    result.truncated |= overflowed;
    result
}

/// Core materialization over already-extracted text rows
pub fn materialize_rows(
    columns: &[String],
    rows: Vec<Vec<String>>,
    max_rows: usize,
) -> MaterializedResult {
    let mut data: ResultData = columns
        .iter()
        .map(|name| (name.clone(), Vec::new()))
        .collect();
    let mut truncated = false;

    for (row_idx, row) in rows.into_iter().enumerate() {
        if row_idx == max_rows {
            truncated = true;
            break;
        }
        for (name, raw) in columns.iter().zip(row) {
            if let Some(values) = data.get_mut(name) {
                values.push(parse_cell(&raw));
            }
        }
    }

    MaterializedResult {
        data: Some(data),
        truncated,
    }
}
