//! exec
//! ----
//! Collects a planned `LazyFrame` and shapes the result for callers:
//! typed JSON rows plus row accounting. Results larger than
//! `TRUNCATE_THRESHOLD` are cut down to `TRUNCATED_ROW_COUNT` rows with an
//! explanatory note; the caller is expected to narrow the query with
//! filters, grouping or an explicit limit.

use polars::prelude::{AnyValue, DataFrame, LazyFrame};
use serde::Serialize;
use serde_json::{json, Map, Number, Value};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::pipeline::Plan;

/// Result sets strictly larger than this row count are truncated.
pub const TRUNCATE_THRESHOLD: usize = 10_000;
/// Number of rows returned when truncation applies.
pub const TRUNCATED_ROW_COUNT: usize = 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub rows: Vec<Value>,
    /// Rows actually returned (after any truncation).
    pub row_count: usize,
    /// Rows the query produced before truncation.
    pub total_rows: usize,
    pub column_names: Vec<String>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub applied_operations: Vec<String>,
}

pub fn execute(plan: &Plan, lf: LazyFrame, resource_id: u64) -> EngineResult<ExecutionResult> {
    let lf = plan.apply(lf)?;
    let df = lf.collect().map_err(|e| {
        EngineError::exec(resource_id, "collect".to_string(), e.to_string())
    })?;

    let total_rows = df.height();
    let truncated = total_rows > TRUNCATE_THRESHOLD;
    let df = if truncated { df.head(Some(TRUNCATED_ROW_COUNT)) } else { df };
    if truncated {
        warn!(target: "tabq::exec", resource_id, total_rows, returned = TRUNCATED_ROW_COUNT,
            "result truncated");
    }

    let column_names: Vec<String> =
        df.get_column_names().iter().map(|s| s.to_string()).collect();
    let rows = dataframe_to_rows(&df, resource_id)?;
    let row_count = rows.len();
    info!(target: "tabq::exec", resource_id, row_count, total_rows, "query executed");

    let note = truncated.then(|| {
        format!(
            "result has {total_rows} rows; returning the first {TRUNCATED_ROW_COUNT}. \
             Narrow the query with a filter, grouping or row_limit to see the rest."
        )
    });

    Ok(ExecutionResult {
        rows,
        row_count,
        total_rows,
        column_names,
        truncated,
        note,
        applied_operations: plan.summary(),
    })
}

/// Row-major JSON objects with native types preserved. Numbers stay
/// numbers, booleans stay booleans; anything exotic falls back to its
/// display form.
pub fn dataframe_to_rows(df: &DataFrame, resource_id: u64) -> EngineResult<Vec<Value>> {
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let mut obj = Map::with_capacity(names.len());
        for name in &names {
            let s = df.column(name).map_err(|e| {
                EngineError::exec(resource_id, "materialize".to_string(), e.to_string())
            })?;
            let v = match s.get(i) {
                Ok(AnyValue::Null) => Value::Null,
                Ok(AnyValue::Boolean(b)) => Value::Bool(b),
                Ok(AnyValue::Int8(n)) => json!(n),
                Ok(AnyValue::Int16(n)) => json!(n),
                Ok(AnyValue::Int32(n)) => json!(n),
                Ok(AnyValue::Int64(n)) => json!(n),
                Ok(AnyValue::UInt8(n)) => json!(n),
                Ok(AnyValue::UInt16(n)) => json!(n),
                Ok(AnyValue::UInt32(n)) => json!(n),
                Ok(AnyValue::UInt64(n)) => json!(n),
                Ok(AnyValue::Float32(f)) => Number::from_f64(f as f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                Ok(AnyValue::Float64(f)) => {
                    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
                }
                Ok(AnyValue::String(v)) => Value::String(v.to_string()),
                Ok(AnyValue::StringOwned(v)) => Value::String(v.to_string()),
                Ok(other) => Value::String(other.to_string()),
                Err(e) => {
                    return Err(EngineError::exec(
                        resource_id,
                        "materialize".to_string(),
                        e.to_string(),
                    ))
                }
            };
            obj.insert(name.clone(), v);
        }
        rows.push(Value::Object(obj));
    }
    Ok(rows)
}
