//! HealthValidator: post-join diagnostics and the PASS/WARN/FAIL verdict.
//!
//! Every join step is followed by a validation pass over (pre-left,
//! pre-right, post). The report is immutable once produced and is surfaced
//! to the orchestrator so a human can confirm or reject the join.

use crate::config::HealthConfig;
use crate::frame::{DateGranularity, SchemaFrame};
use crate::join::{JoinPhase, JoinType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Overall classification of one join step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

/// One triggered check, with enough context for a remediation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Verdict,
    pub metric: String,
    pub detail: String,
}

/// Null-rate movement for one post-join column that was non-null before the
/// join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullDelta {
    pub column: String,
    pub pre_rate: f64,
    pub post_rate: f64,
}

/// Raw measurements taken for one join step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub pre_left_rows: usize,
    pub pre_right_rows: usize,
    pub post_rows: usize,
    pub duplicate_left_keys: usize,
    pub duplicate_right_keys: usize,
    pub unmatched_left: usize,
    pub unmatched_right: usize,
    pub unmatched_left_ratio: f64,
    pub unmatched_right_ratio: f64,
    pub null_deltas: Vec<NullDelta>,
}

/// Immutable diagnostic summary of one join step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub step: usize,
    pub phase: JoinPhase,
    pub join_type: JoinType,
    pub left_frame: String,
    pub right_frame: String,
    pub metrics: HealthMetrics,
    pub findings: Vec<Finding>,
    pub verdict: Verdict,
}

/// Everything the validator needs to know about the step it is checking.
pub struct StepContext<'a> {
    pub step: usize,
    pub phase: JoinPhase,
    pub join_type: JoinType,
    /// (left column, right column) key pairs used by the step.
    pub key_pairs: &'a [(String, String)],
    /// Granularity dates were canonicalized to, if any key pair is a date.
    pub granularity: Option<DateGranularity>,
}

pub struct HealthValidator {
    config: HealthConfig,
}

impl HealthValidator {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    pub fn validate(
        &self,
        pre_left: &SchemaFrame,
        pre_right: &SchemaFrame,
        post: &SchemaFrame,
        ctx: &StepContext<'_>,
    ) -> HealthReport {
        let mut findings = Vec::new();

        let left_keys: Vec<String> = ctx.key_pairs.iter().map(|(l, _)| l.clone()).collect();
        let right_keys: Vec<String> = ctx.key_pairs.iter().map(|(_, r)| r.clone()).collect();

        let (left_distinct, duplicate_left_keys) =
            key_profile(pre_left, &left_keys, ctx.granularity);
        let (right_distinct, duplicate_right_keys) =
            key_profile(pre_right, &right_keys, ctx.granularity);

        let unmatched_left = left_distinct.difference(&right_distinct).count();
        let unmatched_right = right_distinct.difference(&left_distinct).count();

        let metrics = HealthMetrics {
            pre_left_rows: pre_left.n_rows(),
            pre_right_rows: pre_right.n_rows(),
            post_rows: post.n_rows(),
            duplicate_left_keys,
            duplicate_right_keys,
            unmatched_left,
            unmatched_right,
            unmatched_left_ratio: ratio(unmatched_left, left_distinct.len()),
            unmatched_right_ratio: ratio(unmatched_right, right_distinct.len()),
            null_deltas: self.null_deltas(pre_left, pre_right, post, ctx.join_type),
        };

        self.check_row_drift(&metrics, ctx, &mut findings);
        self.check_null_rates(&metrics, &mut findings);
        self.check_duplicates(&metrics, ctx, &mut findings);

        let verdict = findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Verdict::Pass);
        debug!(step = ctx.step, ?verdict, findings = findings.len(), "health check complete");

        HealthReport {
            step: ctx.step,
            phase: ctx.phase,
            join_type: ctx.join_type,
            left_frame: pre_left.name.clone(),
            right_frame: pre_right.name.clone(),
            metrics,
            findings,
            verdict,
        }
    }

    /// Row-count drift against the bound implied by the join type.
    fn check_row_drift(
        &self,
        metrics: &HealthMetrics,
        ctx: &StepContext<'_>,
        findings: &mut Vec<Finding>,
    ) {
        let l = metrics.pre_left_rows;
        let r = metrics.pre_right_rows;
        let post = metrics.post_rows;
        let violation = match ctx.join_type {
            JoinType::Inner => (post > l.min(r)).then(|| {
                format!("inner join produced {post} rows, more than min({l}, {r})")
            }),
            JoinType::Left => (post < l).then(|| {
                format!("left join produced {post} rows, fewer than the {l} left rows")
            }),
            JoinType::Outer => (post < l.max(r)).then(|| {
                format!("outer join produced {post} rows, fewer than max({l}, {r})")
            }),
        };
        if let Some(detail) = violation {
            findings.push(Finding {
                severity: Verdict::Fail,
                metric: "row_count_drift".to_string(),
                detail,
            });
        }
    }

    fn check_null_rates(&self, metrics: &HealthMetrics, findings: &mut Vec<Finding>) {
        for delta in &metrics.null_deltas {
            let new_nulls = delta.post_rate - delta.pre_rate;
            let severity = if new_nulls > self.config.null_rate_fail {
                Verdict::Fail
            } else if new_nulls > self.config.null_rate_warn {
                Verdict::Warn
            } else {
                continue;
            };
            findings.push(Finding {
                severity,
                metric: "null_rate_delta".to_string(),
                detail: format!(
                    "column '{}' went from {:.1}% to {:.1}% null",
                    delta.column,
                    delta.pre_rate * 100.0,
                    delta.post_rate * 100.0
                ),
            });
        }
    }

    /// Duplicate keys on a side the join type expects to be unique.
    fn check_duplicates(
        &self,
        metrics: &HealthMetrics,
        ctx: &StepContext<'_>,
        findings: &mut Vec<Finding>,
    ) {
        let (check_left, check_right) = match ctx.join_type {
            // Left joins enrich the anchor side; only the right side is
            // expected to be one-row-per-key.
            JoinType::Left => (false, true),
            JoinType::Inner | JoinType::Outer => (true, true),
        };
        if check_left && metrics.duplicate_left_keys > 0 {
            findings.push(Finding {
                severity: Verdict::Warn,
                metric: "duplicate_keys_left".to_string(),
                detail: format!(
                    "{} duplicate key tuples on the left side",
                    metrics.duplicate_left_keys
                ),
            });
        }
        if check_right && metrics.duplicate_right_keys > 0 {
            findings.push(Finding {
                severity: Verdict::Warn,
                metric: "duplicate_keys_right".to_string(),
                detail: format!(
                    "{} duplicate key tuples on the right side",
                    metrics.duplicate_right_keys
                ),
            });
        }
    }

    /// Null-rate movement for post columns traceable to a pre column that
    /// had no nulls before the join.
    ///
    /// On a left join, nulls in right-sourced columns are the expected
    /// representation of unmatched anchor rows (already reported through the
    /// unmatched-key counts), so only left-sourced columns are checked.
    fn null_deltas(
        &self,
        pre_left: &SchemaFrame,
        pre_right: &SchemaFrame,
        post: &SchemaFrame,
        join_type: JoinType,
    ) -> Vec<NullDelta> {
        let mut deltas = Vec::new();
        for column in post.columns() {
            let source = source_column(&column.name, pre_left, pre_right);
            let Some((pre, side)) = source else { continue };
            if join_type == JoinType::Left && side == Side::Right {
                continue;
            }
            if pre.null_count() > 0 {
                continue;
            }
            let post_rate = column.null_rate();
            if post_rate > 0.0 {
                deltas.push(NullDelta {
                    column: column.name.clone(),
                    pre_rate: 0.0,
                    post_rate,
                });
            }
        }
        deltas
    }
}

/// Distinct key tuples and duplicate-tuple count for one side.
fn key_profile(
    frame: &SchemaFrame,
    keys: &[String],
    granularity: Option<DateGranularity>,
) -> (HashSet<Vec<String>>, usize) {
    let mut distinct = HashSet::new();
    let mut duplicates = 0;
    for row in 0..frame.n_rows() {
        if let Some(key) = frame.row_key(row, keys, granularity) {
            if !distinct.insert(key) {
                duplicates += 1;
            }
        }
    }
    (distinct, duplicates)
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Trace a post-join column back to its pre-join source, accounting for the
/// `_left`/`_right` suffixes the engine applies to colliding names.
fn source_column<'a>(
    name: &str,
    pre_left: &'a SchemaFrame,
    pre_right: &'a SchemaFrame,
) -> Option<(&'a crate::frame::Column, Side)> {
    if let Some(col) = pre_left.column(name) {
        return Some((col, Side::Left));
    }
    if let Some(col) = pre_right.column(name) {
        return Some((col, Side::Right));
    }
    if let Some(base) = name.strip_suffix("_left") {
        return pre_left.column(base).map(|c| (c, Side::Left));
    }
    if let Some(base) = name.strip_suffix("_right") {
        return pre_right.column(base).map(|c| (c, Side::Right));
    }
    None
}
