//! pipeline
//! --------
//! Translates an `OperationSpec` into an ordered stage plan and applies it
//! to a `LazyFrame`. Stage order is fixed: projection, filter, group and
//! aggregate, sort, limit. Column membership is validated while the plan is
//! built so an unknown column is reported with the stage it failed in,
//! before any data is read.

use polars::prelude::{col, DataType, Expr, IdxSize, LazyFrame, SortMultipleOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alias;
use crate::error::{EngineError, EngineResult};
use crate::filter::{self, FilterExpr};

/// Declarative description of the operations to run against a resource.
/// All fields are optional; an empty spec returns the resource as-is
/// (subject to the truncation policy).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationSpec {
    pub select_columns: Option<Vec<String>>,
    pub filter_expression: Option<String>,
    pub primary_group: Option<String>,
    pub secondary_group: Option<String>,
    pub aggregation: Option<AggKind>,
    pub aggregation_column: Option<String>,
    pub sort_columns: Option<Vec<String>>,
    pub sort_descending: Option<Vec<bool>>,
    pub row_limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggKind {
    Count,
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Std,
    Var,
}

impl AggKind {
    pub fn result_name(&self) -> &'static str {
        match self {
            AggKind::Count => "count",
            AggKind::Sum => "sum",
            AggKind::Mean => "mean",
            AggKind::Median => "median",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::Std => "std",
            AggKind::Var => "var",
        }
    }

    fn expr(&self, base: Expr) -> Expr {
        match self {
            AggKind::Count => base.count().cast(DataType::Int64),
            AggKind::Sum => base.sum(),
            AggKind::Mean => base.mean(),
            AggKind::Median => base.median(),
            AggKind::Min => base.min(),
            AggKind::Max => base.max(),
            AggKind::Std => base.std(1),
            AggKind::Var => base.var(1),
        }
    }
}

#[derive(Debug, Clone)]
enum Stage {
    Projection(Vec<String>),
    Filter(FilterExpr),
    GroupAggregate {
        keys: Vec<String>,
        agg: AggKind,
        value: String,
    },
    Sort {
        columns: Vec<String>,
        descending: Vec<bool>,
    },
    Limit(u32),
}

/// A validated, ordered plan. `schema` is the full file schema, kept for
/// alias translation inside the filter; `output_columns` is the column set
/// after all stages.
#[derive(Debug, Clone)]
pub struct Plan {
    stages: Vec<Stage>,
    schema: Vec<String>,
    output_columns: Vec<String>,
}

pub fn build(spec: &OperationSpec, schema: &[String]) -> EngineResult<Plan> {
    let mut stages = Vec::new();
    // columns live after the stages planned so far
    let mut current: Vec<String> = schema.to_vec();

    if let Some(cols) = &spec.select_columns {
        if cols.is_empty() {
            return Err(EngineError::translation(
                "select_columns".to_string(),
                "column selection must not be empty".to_string(),
            ));
        }
        let mut real = Vec::with_capacity(cols.len());
        for c in cols {
            let r = alias::to_real(c, schema).to_string();
            if !current.contains(&r) {
                return Err(EngineError::unknown_column(r, "select".to_string()));
            }
            real.push(r);
        }
        current = real.clone();
        stages.push(Stage::Projection(real));
    }

    if let Some(text) = &spec.filter_expression {
        let expr = filter::parse(text)?;
        // lower once now to surface unknown columns at build time
        filter::compile(&expr, schema, &current)?;
        stages.push(Stage::Filter(expr));
    }

    let mut keys = Vec::new();
    if let Some(g) = &spec.primary_group {
        keys.push(alias::to_real(g, schema).to_string());
    }
    if let Some(g) = &spec.secondary_group {
        if keys.is_empty() {
            return Err(EngineError::translation(
                g.clone(),
                "secondary_group requires primary_group".to_string(),
            ));
        }
        keys.push(alias::to_real(g, schema).to_string());
    }
    for k in &keys {
        if !current.contains(k) {
            return Err(EngineError::unknown_column(k.clone(), "group".to_string()));
        }
    }

    if let Some(agg) = spec.aggregation {
        if keys.is_empty() {
            return Err(EngineError::translation(
                agg.result_name().to_string(),
                "aggregation requires primary_group".to_string(),
            ));
        }
        let value = match &spec.aggregation_column {
            Some(c) => {
                let r = alias::to_real(c, schema).to_string();
                if !current.contains(&r) {
                    return Err(EngineError::unknown_column(r, "aggregate".to_string()));
                }
                r
            }
            // count does not care which column it counts
            None => keys[0].clone(),
        };
        current = keys.clone();
        current.push(agg.result_name().to_string());
        stages.push(Stage::GroupAggregate { keys: keys.clone(), agg, value });
    }
    // group keys without an aggregation do not collapse rows; the keys were
    // validated above and the stage is a no-op

    if let Some(sort_cols) = &spec.sort_columns {
        if !sort_cols.is_empty() {
            let mut columns = Vec::with_capacity(sort_cols.len());
            let mut descending = Vec::with_capacity(sort_cols.len());
            let explicit = spec.sort_descending.clone().unwrap_or_default();
            for (i, raw) in sort_cols.iter().enumerate() {
                let (key, neg) = alias::parse_sort_key(raw)?;
                let r = alias::to_real(&key, schema).to_string();
                let r = if current.contains(&r) {
                    r
                } else if current.contains(&key) {
                    // aggregate output columns ("sum", "count") are addressed
                    // by their result name, not through the file schema
                    key
                } else {
                    return Err(EngineError::unknown_column(r, "sort".to_string()));
                };
                columns.push(r);
                descending.push(neg || explicit.get(i).copied().unwrap_or(false));
            }
            stages.push(Stage::Sort { columns, descending });
        }
    }

    if let Some(limit) = spec.row_limit {
        if limit == 0 {
            return Err(EngineError::translation(
                "row_limit".to_string(),
                "row_limit must be greater than zero".to_string(),
            ));
        }
        stages.push(Stage::Limit(limit));
    }

    Ok(Plan { stages, schema: schema.to_vec(), output_columns: current })
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    pub fn apply(&self, mut lf: LazyFrame) -> EngineResult<LazyFrame> {
        for stage in &self.stages {
            lf = match stage {
                Stage::Projection(cols) => {
                    let exprs: Vec<Expr> = cols.iter().map(|c| col(c.as_str())).collect();
                    lf.select(exprs)
                }
                Stage::Filter(expr) => {
                    let cols = self.columns_at_filter();
                    let predicate = filter::compile(expr, &self.schema, &cols)?;
                    lf.filter(predicate)
                }
                Stage::GroupAggregate { keys, agg, value } => {
                    let key_exprs: Vec<Expr> = keys.iter().map(|k| col(k.as_str())).collect();
                    let agg_expr = agg.expr(col(value.as_str())).alias(agg.result_name());
                    lf.group_by(key_exprs).agg([agg_expr])
                }
                Stage::Sort { columns, descending } => {
                    let exprs: Vec<Expr> = columns.iter().map(|c| col(c.as_str())).collect();
                    let opts = SortMultipleOptions {
                        descending: descending.clone(),
                        nulls_last: vec![true; exprs.len()],
                        maintain_order: true,
                        multithreaded: true,
                        limit: None,
                    };
                    lf.sort_by_exprs(exprs, opts)
                }
                Stage::Limit(n) => lf.limit(*n as IdxSize),
            };
        }
        debug!(target: "tabq::pipeline", stages = self.stages.len(), "plan applied");
        Ok(lf)
    }

    fn columns_at_filter(&self) -> Vec<String> {
        for stage in &self.stages {
            if let Stage::Projection(cols) = stage {
                return cols.clone();
            }
        }
        self.schema.clone()
    }

    /// Human-readable stage descriptions, in execution order.
    pub fn summary(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|s| match s {
                Stage::Projection(cols) => format!("select: {}", cols.join(", ")),
                Stage::Filter(_) => "filter".to_string(),
                Stage::GroupAggregate { keys, agg, value } => {
                    format!("group by {} -> {}({})", keys.join(", "), agg.result_name(), value)
                }
                Stage::Sort { columns, descending } => {
                    let parts: Vec<String> = columns
                        .iter()
                        .zip(descending)
                        .map(|(c, d)| format!("{}{}", c, if *d { " desc" } else { "" }))
                        .collect();
                    format!("sort: {}", parts.join(", "))
                }
                Stage::Limit(n) => format!("limit: {n}"),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn schema() -> Vec<String> {
        vec!["name".to_string(), "region".to_string(), "amount".to_string()]
    }

    fn sample_df() -> DataFrame {
        df![
            "name" => ["a", "b", "c", "d"],
            "region" => ["north", "south", "north", "south"],
            "amount" => [100i64, 600, 800, 200],
        ]
        .unwrap()
    }

    #[test]
    fn empty_spec_builds_empty_plan() {
        let plan = build(&OperationSpec::default(), &schema()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.output_columns(), schema().as_slice());
    }

    #[test]
    fn filter_then_group_sum() {
        let spec = OperationSpec {
            filter_expression: Some("col3 > 500".to_string()),
            primary_group: Some("col2".to_string()),
            aggregation: Some(AggKind::Sum),
            aggregation_column: Some("col3".to_string()),
            ..Default::default()
        };
        let plan = build(&spec, &schema()).unwrap();
        assert_eq!(plan.output_columns(), &["region".to_string(), "sum".to_string()]);

        let out = plan.apply(sample_df().lazy()).unwrap().collect().unwrap();
        assert_eq!(out.height(), 2);
        let total: i64 = out.column("sum").unwrap().i64().unwrap().into_iter().flatten().sum();
        assert_eq!(total, 1400);
    }

    #[test]
    fn projection_restricts_later_stages() {
        let spec = OperationSpec {
            select_columns: Some(vec!["col1".to_string()]),
            primary_group: Some("region".to_string()),
            ..Default::default()
        };
        let err = build(&spec, &schema()).unwrap_err();
        assert_eq!(err.kind(), "unknown_column");
    }

    #[test]
    fn filter_runs_before_limit() {
        let spec = OperationSpec {
            filter_expression: Some("amount >= 200".to_string()),
            row_limit: Some(2),
            ..Default::default()
        };
        let plan = build(&spec, &schema()).unwrap();
        let out = plan.apply(sample_df().lazy()).unwrap().collect().unwrap();
        // limit applies to the filtered set, not the raw rows
        assert_eq!(out.height(), 2);
        let amounts: Vec<i64> =
            out.column("amount").unwrap().i64().unwrap().into_iter().flatten().collect();
        assert!(amounts.iter().all(|a| *a >= 200));
    }

    #[test]
    fn sort_shorthand_descending() {
        let spec = OperationSpec {
            sort_columns: Some(vec!["-col3".to_string()]),
            ..Default::default()
        };
        let plan = build(&spec, &schema()).unwrap();
        let out = plan.apply(sample_df().lazy()).unwrap().collect().unwrap();
        let amounts: Vec<i64> =
            out.column("amount").unwrap().i64().unwrap().into_iter().flatten().collect();
        assert_eq!(amounts, vec![800, 600, 200, 100]);
    }

    #[test]
    fn sort_on_aggregate_result() {
        let spec = OperationSpec {
            primary_group: Some("region".to_string()),
            aggregation: Some(AggKind::Count),
            sort_columns: Some(vec!["-count".to_string()]),
            ..Default::default()
        };
        let plan = build(&spec, &schema()).unwrap();
        let out = plan.apply(sample_df().lazy()).unwrap().collect().unwrap();
        assert_eq!(out.height(), 2);
        assert!(out.column("count").is_ok());
    }

    #[test]
    fn aggregation_without_group_rejected() {
        let spec = OperationSpec { aggregation: Some(AggKind::Sum), ..Default::default() };
        let err = build(&spec, &schema()).unwrap_err();
        assert_eq!(err.kind(), "translation_error");
    }

    #[test]
    fn zero_row_limit_rejected() {
        let spec = OperationSpec { row_limit: Some(0), ..Default::default() };
        let err = build(&spec, &schema()).unwrap_err();
        assert_eq!(err.kind(), "translation_error");
    }

    #[test]
    fn secondary_group_needs_primary() {
        let spec = OperationSpec {
            secondary_group: Some("region".to_string()),
            ..Default::default()
        };
        assert!(build(&spec, &schema()).is_err());
    }

    #[test]
    fn group_without_aggregation_does_not_collapse_rows() {
        let spec = OperationSpec {
            primary_group: Some("region".to_string()),
            ..Default::default()
        };
        let plan = build(&spec, &schema()).unwrap();
        let out = plan.apply(sample_df().lazy()).unwrap().collect().unwrap();
        assert_eq!(out.height(), 4);
        assert_eq!(out.width(), 3);
    }
}
