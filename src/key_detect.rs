//! KeyDetector: infers candidate join keys between two frames from
//! structural and statistical signals.
//!
//! For every column pair with compatible semantic types the detector scores
//! name similarity (Jaro-Winkler on normalized names), distinct-value
//! overlap, and format agreement. A name match alone never qualifies a pair:
//! columns that share no values are discarded outright.

use crate::config::DetectorConfig;
use crate::frame::{DateGranularity, SchemaFrame, SemanticType};
use crate::suggest::{ColumnSample, KeyHint, NoSuggestions, SuggestionProvider};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::OnceLock;
use strsim::jaro_winkler;
use tracing::debug;

/// One proposed join-key pair with its combined confidence and the signals
/// that produced it, kept for the human-review surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateKey {
    pub left_column: String,
    pub right_column: String,
    /// Combined confidence in [0, 1].
    pub confidence: f64,
    pub name_similarity: f64,
    pub value_overlap: f64,
    pub format_match: f64,
}

pub struct KeyDetector {
    config: DetectorConfig,
}

impl KeyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Detect candidate keys without advisory input.
    ///
    /// Candidates come back sorted by confidence descending; ties keep the
    /// declaration order of the left frame's columns. An empty result means
    /// no pair cleared the thresholds, which is a normal outcome.
    pub fn detect(&self, left: &SchemaFrame, right: &SchemaFrame) -> Vec<CandidateKey> {
        self.detect_with_hints(left, right, &NoSuggestions)
    }

    /// Detect candidate keys, letting an advisory provider boost (never
    /// create) candidates.
    pub fn detect_with_hints(
        &self,
        left: &SchemaFrame,
        right: &SchemaFrame,
        provider: &dyn SuggestionProvider,
    ) -> Vec<CandidateKey> {
        let hints = provider.suggest_keys(&samples_of(left), &samples_of(right));
        let mut candidates = Vec::new();

        for left_col in left.columns() {
            for right_col in right.columns() {
                if !types_compatible(left_col.dtype, right_col.dtype) {
                    continue;
                }

                // Dates are compared at the coarser of the two granularities.
                let granularity = match (left_col.date_granularity(), right_col.date_granularity())
                {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };

                let left_keys = left_col.distinct_keys(granularity);
                let right_keys = right_col.distinct_keys(granularity);
                if left_keys.is_empty() || right_keys.is_empty() {
                    continue;
                }
                let intersection = left_keys.intersection(&right_keys).count();
                if intersection == 0 {
                    // Threshold law: no shared values, no candidate.
                    continue;
                }
                let union = left_keys.union(&right_keys).count();
                let overlap = intersection as f64 / union as f64;
                if overlap < self.config.min_overlap {
                    continue;
                }

                let name_similarity = jaro_winkler(
                    &normalize_name(&left_col.name),
                    &normalize_name(&right_col.name),
                );
                let format_match =
                    format_score(left_col.dtype, left_col.date_granularity(), right_col.date_granularity());

                let mut confidence = self.config.name_weight * name_similarity
                    + self.config.overlap_weight * overlap
                    + self.config.format_weight * format_match;
                if hint_names_pair(&hints, &left_col.name, &right_col.name) {
                    // Boost scales into the remaining headroom so hinted
                    // candidates never exceed 1.0.
                    confidence += self.config.hint_boost * (1.0 - confidence);
                }
                let confidence = confidence.clamp(0.0, 1.0);

                if confidence < self.config.min_confidence {
                    continue;
                }
                candidates.push(CandidateKey {
                    left_column: left_col.name.clone(),
                    right_column: right_col.name.clone(),
                    confidence,
                    name_similarity,
                    value_overlap: overlap,
                    format_match,
                });
            }
        }

        // Stable sort: equal confidences keep generation order, which is the
        // left frame's column declaration order.
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        debug!(
            left = %left.name,
            right = %right.name,
            n = candidates.len(),
            "key detection complete"
        );
        candidates
    }
}

fn types_compatible(a: SemanticType, b: SemanticType) -> bool {
    matches!(
        (a, b),
        (SemanticType::Identifier, SemanticType::Identifier)
            | (SemanticType::Date, SemanticType::Date)
    )
}

fn format_score(
    dtype: SemanticType,
    left_gran: Option<DateGranularity>,
    right_gran: Option<DateGranularity>,
) -> f64 {
    match dtype {
        SemanticType::Date => match (left_gran, right_gran) {
            (Some(a), Some(b)) if a == b => 1.0,
            (Some(_), Some(_)) => 0.5,
            _ => 0.0,
        },
        _ => 1.0,
    }
}

fn hint_names_pair(hints: &[KeyHint], left: &str, right: &str) -> bool {
    hints
        .iter()
        .any(|h| h.left_column == left && h.right_column == right)
}

/// Lower-case and strip punctuation/whitespace so `Customer_ID`, `customerid`
/// and `Customer ID` all normalize identically.
fn normalize_name(name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| {
        Regex::new(r"[^\p{Alphabetic}\p{N}]+").expect("static pattern")
    });
    re.replace_all(name, "").to_lowercase()
}

fn samples_of(frame: &SchemaFrame) -> Vec<ColumnSample> {
    frame
        .columns()
        .iter()
        .map(|c| ColumnSample {
            name: c.name.clone(),
            dtype: c.dtype,
            samples: c.values.iter().take(5).cloned().collect(),
        })
        .collect()
}
