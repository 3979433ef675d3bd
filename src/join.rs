//! JoinEngine: executes a JoinPlan step by step, validating each step's
//! output before moving on.
//!
//! Two-phase semantics: intra-category steps consolidate multiple files of
//! one category (outer by default, no silent row loss), inter-category steps
//! attach the other categories to the primary one (left by default, anchored
//! on billing). A FAIL verdict halts the plan: the failing step's output and
//! all reports produced so far are returned to the caller, never discarded.

use crate::config::HealthConfig;
use crate::error::{MeldError, Result};
use crate::frame::{Column, DateGranularity, SchemaFrame, SemanticType, Value};
use crate::health::{HealthReport, HealthValidator, StepContext, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Outer,
}

/// Which phase of the two-phase protocol a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPhase {
    Intra,
    Inter,
}

/// Where a step's input frame comes from: a frame the plan owns, or the
/// output of an earlier step (consumed once, ownership transfer).
#[derive(Debug, Clone)]
pub enum StepInput {
    Frame(SchemaFrame),
    StepOutput(usize),
}

/// One join step. Key pairs are (left column, right column), applied in
/// order.
#[derive(Debug, Clone)]
pub struct JoinStep {
    pub left: StepInput,
    pub right: StepInput,
    pub keys: Vec<(String, String)>,
    pub join_type: JoinType,
    pub phase: JoinPhase,
    /// When set, a boolean column with this name is appended to the step's
    /// output, true on rows where the left side found at least one match.
    pub presence_flag: Option<String>,
}

/// Ordered list of join steps; consumed once by [`JoinEngine::execute`].
#[derive(Debug, Clone, Default)]
pub struct JoinPlan {
    pub steps: Vec<JoinStep>,
}

/// Final frame plus the ordered health reports, one per executed step.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub frame: SchemaFrame,
    pub reports: Vec<HealthReport>,
}

/// Cooperative cancellation signal, checked between plan steps only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct JoinEngine {
    validator: HealthValidator,
}

impl JoinEngine {
    pub fn new(health: HealthConfig) -> Self {
        Self {
            validator: HealthValidator::new(health),
        }
    }

    /// Execute the plan in order. Fail-stop: a FAIL verdict at step *i*
    /// produces step *i*'s frame and exactly *i+1* reports, and no later
    /// step runs. Cancellation is honored between steps, never mid-step.
    pub fn execute(&self, plan: JoinPlan, cancel: &CancelFlag) -> Result<JoinOutcome> {
        let mut reports: Vec<HealthReport> = Vec::new();
        let mut outputs: Vec<Option<SchemaFrame>> = Vec::new();

        for (index, step) in plan.steps.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(MeldError::Cancelled { step: index });
            }

            let left = resolve_input(step.left, &mut outputs, index)?;
            let right = resolve_input(step.right, &mut outputs, index)?;
            info!(
                step = index,
                phase = ?step.phase,
                join_type = ?step.join_type,
                left = %left.name,
                right = %right.name,
                "executing join step"
            );

            let (post, ctx_granularity) = join_frames(
                &left,
                &right,
                &step.keys,
                step.join_type,
                step.presence_flag.as_deref(),
            )?;

            let ctx = StepContext {
                step: index,
                phase: step.phase,
                join_type: step.join_type,
                key_pairs: &step.keys,
                granularity: ctx_granularity,
            };
            let report = self.validator.validate(&left, &right, &post, &ctx);
            let verdict = report.verdict;
            reports.push(report);

            if verdict == Verdict::Fail {
                warn!(step = index, "health check FAILED, halting plan");
                let failing = reports
                    .last()
                    .map(|r| {
                        r.findings
                            .iter()
                            .find(|f| f.severity == Verdict::Fail)
                            .map(|f| f.metric.clone())
                            .unwrap_or_default()
                    })
                    .unwrap_or_default();
                return Err(MeldError::JoinHealth {
                    step: index,
                    metric: failing,
                    partial: Box::new(JoinOutcome {
                        frame: post,
                        reports,
                    }),
                });
            }
            outputs.push(Some(post));
        }

        let frame = outputs
            .pop()
            .flatten()
            .ok_or_else(|| MeldError::Plan("Plan contains no steps".to_string()))?;
        Ok(JoinOutcome { frame, reports })
    }
}

fn resolve_input(
    input: StepInput,
    outputs: &mut [Option<SchemaFrame>],
    step: usize,
) -> Result<SchemaFrame> {
    match input {
        StepInput::Frame(frame) => Ok(frame),
        StepInput::StepOutput(index) => outputs
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| {
                MeldError::Plan(format!(
                    "Step {step} references output of step {index}, which is not available"
                ))
            }),
    }
}

/// Equality join on normalized keys. Row order contract: left rows in left
/// order (each followed by its matches in right order), then, on outer
/// joins, unmatched right-only rows in right order.
fn join_frames(
    left: &SchemaFrame,
    right: &SchemaFrame,
    keys: &[(String, String)],
    join_type: JoinType,
    presence_flag: Option<&str>,
) -> Result<(SchemaFrame, Option<DateGranularity>)> {
    if keys.is_empty() {
        return Err(MeldError::Plan(format!(
            "No join keys for '{}' x '{}'",
            left.name, right.name
        )));
    }
    let left_keys: Vec<String> = keys.iter().map(|(l, _)| l.clone()).collect();
    let right_keys: Vec<String> = keys.iter().map(|(_, r)| r.clone()).collect();
    left.validate_join_contract(&left_keys)?;
    right.validate_join_contract(&right_keys)?;

    // Dates on both sides are canonicalized to the coarser granularity.
    let granularity = keys
        .iter()
        .filter_map(|(l, r)| {
            let lg = left.column(l).and_then(Column::date_granularity);
            let rg = right.column(r).and_then(Column::date_granularity);
            match (lg, rg) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            }
        })
        .max();

    // Index the right side: key tuple -> row indices in right order.
    let mut right_index: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for row in 0..right.n_rows() {
        let key = right
            .row_key(row, &right_keys, granularity)
            .ok_or_else(|| MeldError::SchemaViolation {
                frame: right.name.clone(),
                reason: format!("Null join key at row {row}"),
            })?;
        right_index.entry(key).or_default().push(row);
    }

    // Pair up rows. `None` on a side means that side contributes nulls.
    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    let mut right_matched = vec![false; right.n_rows()];
    for row in 0..left.n_rows() {
        let key = left
            .row_key(row, &left_keys, granularity)
            .ok_or_else(|| MeldError::SchemaViolation {
                frame: left.name.clone(),
                reason: format!("Null join key at row {row}"),
            })?;
        match right_index.get(&key) {
            Some(matches) => {
                for &r in matches {
                    right_matched[r] = true;
                    pairs.push((Some(row), Some(r)));
                }
            }
            None => {
                if matches!(join_type, JoinType::Left | JoinType::Outer) {
                    pairs.push((Some(row), None));
                }
            }
        }
    }
    if join_type == JoinType::Outer {
        for (row, matched) in right_matched.iter().enumerate() {
            if !matched {
                pairs.push((None, Some(row)));
            }
        }
    }

    // Column layout: left columns first (key columns coalesce the right key
    // for right-only rows), then right non-key columns. A left non-key
    // column shadowed by a right column gets the left tag; any right
    // non-key column whose name appears on the left (key or not) gets the
    // right tag. Key columns keep the left name.
    let right_key_names: Vec<&str> = right_keys.iter().map(String::as_str).collect();
    let left_collisions: Vec<String> = right
        .columns()
        .iter()
        .filter(|c| !right_key_names.contains(&c.name.as_str()))
        .filter(|c| left.column(&c.name).is_some() && !left_keys.contains(&c.name))
        .map(|c| c.name.clone())
        .collect();

    let mut out_columns: Vec<Column> = Vec::new();
    for column in left.columns() {
        let key_pos = left_keys.iter().position(|k| k == &column.name);
        let values: Vec<Value> = pairs
            .iter()
            .map(|(l, r)| match (l, key_pos) {
                (Some(row), _) => column.values[*row].clone(),
                (None, Some(pos)) => {
                    // Right-only row: fill the key from the right side.
                    let right_col = right.column(&right_keys[pos]);
                    match (right_col, r) {
                        (Some(col), Some(row)) => col.values[*row].clone(),
                        _ => Value::Null,
                    }
                }
                (None, None) => Value::Null,
            })
            .collect();
        let name = if left_collisions.contains(&column.name) {
            format!("{}_left", column.name)
        } else {
            column.name.clone()
        };
        out_columns.push(Column::new(name, column.dtype, values));
    }
    for column in right.columns() {
        if right_key_names.contains(&column.name.as_str()) {
            continue;
        }
        let values: Vec<Value> = pairs
            .iter()
            .map(|(_, r)| match r {
                Some(row) => column.values[*row].clone(),
                None => Value::Null,
            })
            .collect();
        let name = if left.column(&column.name).is_some() {
            format!("{}_right", column.name)
        } else {
            column.name.clone()
        };
        out_columns.push(Column::new(name, column.dtype, values));
    }
    if let Some(flag) = presence_flag {
        let values: Vec<Value> = pairs
            .iter()
            .map(|(l, r)| Value::Bool(l.is_some() && r.is_some()))
            .collect();
        out_columns.push(Column::new(flag.to_string(), SemanticType::Categorical, values));
    }

    let name = format!("{}+{}", left.name, right.name);
    Ok((SchemaFrame::new(name, out_columns)?, granularity))
}
