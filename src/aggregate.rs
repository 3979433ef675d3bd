//! Aggregator: collapses many rows per entity key into one row per key
//! tuple, resolving conflicts through a closed set of named strategies.

use crate::config::AggregateConfig;
use crate::error::{MeldError, Result};
use crate::frame::{Column, SchemaFrame, SemanticType, Value};
use crate::suggest::{ColumnSample, SuggestionProvider};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// How a non-key column is collapsed within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sum,
    Mean,
    Min,
    Max,
    First,
    Last,
    Mode,
    Concatenate,
    CountDistinct,
    /// Delegate the choice to the injected suggestion provider.
    Suggested,
}

impl Strategy {
    fn label(self) -> &'static str {
        match self {
            Strategy::Sum => "sum",
            Strategy::Mean => "mean",
            Strategy::Min => "min",
            Strategy::Max => "max",
            Strategy::First => "first",
            Strategy::Last => "last",
            Strategy::Mode => "mode",
            Strategy::Concatenate => "concat",
            Strategy::CountDistinct => "unique_count",
            Strategy::Suggested => "suggested",
        }
    }

    /// Strategy/type compatibility table.
    fn accepts(self, dtype: SemanticType) -> bool {
        match self {
            Strategy::Sum | Strategy::Mean => dtype == SemanticType::Numeric,
            Strategy::Min | Strategy::Max => {
                matches!(dtype, SemanticType::Numeric | SemanticType::Date)
            }
            Strategy::Mode => dtype == SemanticType::Categorical,
            Strategy::Concatenate => dtype == SemanticType::Text,
            Strategy::First | Strategy::Last | Strategy::CountDistinct => true,
            Strategy::Suggested => true,
        }
    }
}

/// Per-category aggregation plan: the grouping key set plus one strategy per
/// non-key column. Immutable once aggregation starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Group-by key columns, e.g. `[CustomerID]` or `[CustomerID, ProductID]`.
    pub group_keys: Vec<String>,
    /// Strategy per non-key column. Columns absent from the map are dropped.
    pub strategies: HashMap<String, Strategy>,
    /// Ordering column for `first`/`last`. When absent, input order is used
    /// and the run is flagged as order-dependent.
    pub order_by: Option<String>,
}

/// Aggregation result: the collapsed frame plus non-fatal warnings collected
/// along the way (e.g. order-dependence of first/last).
#[derive(Debug, Clone)]
pub struct AggregationOutput {
    pub frame: SchemaFrame,
    pub warnings: Vec<String>,
}

pub struct Aggregator {
    config: AggregateConfig,
}

impl Aggregator {
    pub fn new(config: AggregateConfig) -> Self {
        Self { config }
    }

    /// Duplicate-group probe: true when any key tuple occurs more than once,
    /// i.e. the frame is not yet at the desired granularity.
    pub fn needs_aggregation(frame: &SchemaFrame, group_keys: &[String]) -> Result<bool> {
        for key in group_keys {
            if frame.column(key).is_none() {
                return Err(MeldError::Aggregation {
                    column: key.clone(),
                    reason: format!("Group key not found in frame '{}'", frame.name),
                });
            }
        }
        let mut seen = HashSet::new();
        for row in 0..frame.n_rows() {
            let key = frame
                .row_key(row, group_keys, None)
                .ok_or_else(|| null_key_error(frame, group_keys, row))?;
            if !seen.insert(key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Collapse `frame` to one row per distinct key tuple, in order of first
    /// appearance. The input is consumed; the output is a new frame.
    pub fn aggregate(
        &self,
        frame: SchemaFrame,
        spec: &AggregationSpec,
        provider: &dyn SuggestionProvider,
    ) -> Result<AggregationOutput> {
        let mut warnings = Vec::new();
        for key in &spec.group_keys {
            if frame.column(key).is_none() {
                return Err(MeldError::Aggregation {
                    column: key.clone(),
                    reason: format!("Group key not found in frame '{}'", frame.name),
                });
            }
        }
        let resolved = self.resolve_strategies(&frame, spec, provider)?;

        // Group rows by canonical key tuple, preserving first-seen order.
        let mut group_order: Vec<Vec<String>> = Vec::new();
        let mut groups: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
        for row in 0..frame.n_rows() {
            let key = frame
                .row_key(row, &spec.group_keys, None)
                .ok_or_else(|| null_key_error(&frame, &spec.group_keys, row))?;
            match groups.get_mut(&key) {
                Some(rows) => rows.push(row),
                None => {
                    group_order.push(key.clone());
                    groups.insert(key, vec![row]);
                }
            }
        }

        let order_index = match &spec.order_by {
            Some(col) => {
                let idx = frame.column_index(col).ok_or_else(|| MeldError::Aggregation {
                    column: col.clone(),
                    reason: "Ordering column not found".to_string(),
                })?;
                Some(idx)
            }
            None => {
                let order_dependent = resolved
                    .iter()
                    .any(|(_, s)| matches!(s, Strategy::First | Strategy::Last));
                if order_dependent {
                    let msg = "first/last used without an ordering column; \
                               result depends on input row order"
                        .to_string();
                    warn!(frame = %frame.name, "{msg}");
                    warnings.push(msg);
                }
                None
            }
        };

        // Key columns carry the original value from each group's first row.
        let mut out_columns: Vec<Column> = Vec::new();
        for key_name in &spec.group_keys {
            let idx = frame.column_index(key_name).ok_or_else(|| MeldError::Aggregation {
                column: key_name.clone(),
                reason: format!("Group key not found in frame '{}'", frame.name),
            })?;
            let source = &frame.columns()[idx];
            let values = group_order
                .iter()
                .map(|key| source.values[groups[key][0]].clone())
                .collect();
            out_columns.push(Column::new(key_name.clone(), source.dtype, values));
        }

        // Value columns, in input declaration order.
        for column in frame.columns() {
            if spec.group_keys.contains(&column.name) {
                continue;
            }
            let Some(strategy) = resolved.get(&column.name) else {
                debug!(column = %column.name, "no strategy declared, dropping column");
                continue;
            };
            let mut values = Vec::with_capacity(group_order.len());
            for key in &group_order {
                let mut rows = groups[key].clone();
                if let Some(order_idx) = order_index {
                    rows.sort_by(|&a, &b| {
                        cmp_values(&frame.columns()[order_idx].values[a], &frame.columns()[order_idx].values[b])
                    });
                }
                values.push(self.resolve_group(column, &rows, *strategy)?);
            }
            let name = if self.config.suffix_columns {
                format!("{}_{}", column.name, strategy.label())
            } else {
                column.name.clone()
            };
            out_columns.push(Column::new(name, output_dtype(column.dtype, *strategy), values));
        }

        let out = SchemaFrame::new(frame.name.clone(), out_columns)?;
        debug!(
            frame = %out.name,
            rows_in = frame.n_rows(),
            rows_out = out.n_rows(),
            "aggregation complete"
        );
        Ok(AggregationOutput { frame: out, warnings })
    }

    /// Replace every `Suggested` entry with a concrete strategy from the
    /// provider, and check strategy/type compatibility for the full map.
    fn resolve_strategies(
        &self,
        frame: &SchemaFrame,
        spec: &AggregationSpec,
        provider: &dyn SuggestionProvider,
    ) -> Result<HashMap<String, Strategy>> {
        let mut resolved = HashMap::new();
        for (name, strategy) in &spec.strategies {
            let column = frame.column(name).ok_or_else(|| MeldError::Aggregation {
                column: name.clone(),
                reason: "Column named in spec not found in frame".to_string(),
            })?;
            let concrete = if *strategy == Strategy::Suggested {
                let sample = ColumnSample {
                    name: name.clone(),
                    dtype: column.dtype,
                    samples: column.values.iter().take(5).cloned().collect(),
                };
                let hint = provider.suggest_strategy(&sample).ok_or_else(|| {
                    MeldError::Aggregation {
                        column: name.clone(),
                        reason: "Strategy is 'suggested' but no suggestion is available"
                            .to_string(),
                    }
                })?;
                if hint.strategy == Strategy::Suggested {
                    return Err(MeldError::Aggregation {
                        column: name.clone(),
                        reason: "Suggestion provider must resolve to a concrete strategy"
                            .to_string(),
                    });
                }
                debug!(column = %name, strategy = hint.strategy.label(), "using suggested strategy");
                hint.strategy
            } else {
                *strategy
            };
            if !concrete.accepts(column.dtype) {
                return Err(MeldError::Aggregation {
                    column: name.clone(),
                    reason: format!(
                        "Strategy '{}' is incompatible with column type {:?}",
                        concrete.label(),
                        column.dtype
                    ),
                });
            }
            resolved.insert(name.clone(), concrete);
        }
        Ok(resolved)
    }

    /// Collapse one column over one group of row indices.
    fn resolve_group(&self, column: &Column, rows: &[usize], strategy: Strategy) -> Result<Value> {
        let values = || rows.iter().map(|&r| &column.values[r]);
        let non_null = || values().filter(|v| !v.is_null());
        Ok(match strategy {
            Strategy::Sum => {
                let mut int_sum: i64 = 0;
                let mut float_sum: f64 = 0.0;
                let mut all_int = true;
                let mut any = false;
                for v in non_null() {
                    any = true;
                    match v {
                        Value::Int(i) => {
                            if all_int {
                                // Overflowing integer sums degrade to float.
                                match int_sum.checked_add(*i) {
                                    Some(sum) => int_sum = sum,
                                    None => all_int = false,
                                }
                            }
                            float_sum += *i as f64;
                        }
                        Value::Float(f) => {
                            all_int = false;
                            float_sum += f;
                        }
                        other => return Err(type_error(column, strategy, other)),
                    }
                }
                if !any {
                    Value::Null
                } else if all_int {
                    Value::Int(int_sum)
                } else {
                    Value::Float(float_sum)
                }
            }
            Strategy::Mean => {
                let nums: Vec<f64> = non_null()
                    .map(|v| v.as_f64().ok_or_else(|| type_error(column, strategy, v)))
                    .collect::<Result<_>>()?;
                if nums.is_empty() {
                    Value::Null
                } else {
                    let mut mean = nums.iter().sum::<f64>() / nums.len() as f64;
                    if let Some(places) = self.config.mean_precision {
                        let factor = 10f64.powi(places as i32);
                        mean = (mean * factor).round() / factor;
                    }
                    Value::Float(mean)
                }
            }
            Strategy::Min => non_null()
                .min_by(|a, b| cmp_values(a, b))
                .cloned()
                .unwrap_or(Value::Null),
            Strategy::Max => non_null()
                .max_by(|a, b| cmp_values(a, b))
                .cloned()
                .unwrap_or(Value::Null),
            Strategy::First => non_null().next().cloned().unwrap_or(Value::Null),
            Strategy::Last => non_null().last().cloned().unwrap_or(Value::Null),
            Strategy::Mode => {
                // Tie-break: lowest first-occurrence index wins.
                let mut counts: Vec<(String, &Value, usize)> = Vec::new();
                for v in non_null() {
                    let repr = v.key_repr(None).unwrap_or_default();
                    match counts.iter_mut().find(|(r, _, _)| *r == repr) {
                        Some(entry) => entry.2 += 1,
                        None => counts.push((repr, v, 1)),
                    }
                }
                let mut best: Option<(&Value, usize)> = None;
                for (_, v, count) in &counts {
                    // Strictly-greater replacement keeps the earliest value
                    // on ties; counts is in first-occurrence order.
                    if best.map_or(true, |(_, c)| *count > c) {
                        best = Some((v, *count));
                    }
                }
                best.map(|(v, _)| v.clone()).unwrap_or(Value::Null)
            }
            Strategy::Concatenate => {
                let distinct: Vec<String> = non_null().map(|v| v.to_string()).unique().collect();
                if distinct.is_empty() {
                    Value::Null
                } else {
                    Value::Text(distinct.join(&self.config.concat_delimiter))
                }
            }
            Strategy::CountDistinct => {
                let n = non_null()
                    .filter_map(|v| v.key_repr(None))
                    .unique()
                    .count();
                Value::Int(n as i64)
            }
            Strategy::Suggested => {
                // Resolved before this point.
                return Err(MeldError::Aggregation {
                    column: column.name.clone(),
                    reason: "Unresolved 'suggested' strategy".to_string(),
                });
            }
        })
    }
}

fn output_dtype(input: SemanticType, strategy: Strategy) -> SemanticType {
    match strategy {
        Strategy::Sum | Strategy::Mean | Strategy::CountDistinct => SemanticType::Numeric,
        Strategy::Concatenate => SemanticType::Text,
        _ => input,
    }
}

fn type_error(column: &Column, strategy: Strategy, value: &Value) -> MeldError {
    MeldError::Aggregation {
        column: column.name.clone(),
        reason: format!(
            "Strategy '{}' cannot be applied to value {:?}",
            strategy.label(),
            value
        ),
    }
}

fn null_key_error(frame: &SchemaFrame, keys: &[String], row: usize) -> MeldError {
    MeldError::SchemaViolation {
        frame: frame.name.clone(),
        reason: format!("Null group key in {keys:?} at row {row}"),
    }
}

/// Total ordering over values for min/max and ordering columns. Nulls sort
/// last; mixed numeric types compare numerically.
pub(crate) fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}
