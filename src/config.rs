//! Tunable thresholds for key detection, health validation and aggregation.
//!
//! Nothing in the engine hard-codes a cutoff; every limit lives here so a
//! caller (or a config file) can adjust it and the test suite can treat them
//! as parameters.

use serde::{Deserialize, Serialize};

/// Key-detection scoring parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum distinct-value overlap ratio for a pair to be considered at
    /// all. Pairs with zero shared values are always discarded.
    pub min_overlap: f64,
    /// Minimum combined confidence for a candidate to be returned.
    pub min_confidence: f64,
    /// Weight of name similarity in the combined score.
    pub name_weight: f64,
    /// Weight of value overlap in the combined score.
    pub overlap_weight: f64,
    /// Weight of the type/format match component.
    pub format_weight: f64,
    /// Fraction of the remaining confidence headroom granted when an
    /// advisory key hint names the pair.
    pub hint_boost: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_overlap: 0.05,
            min_confidence: 0.35,
            name_weight: 0.35,
            overlap_weight: 0.5,
            format_weight: 0.15,
            hint_boost: 0.1,
        }
    }
}

/// Health-validation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// New-null rate on an originally-non-null column above this is a WARN.
    pub null_rate_warn: f64,
    /// New-null rate above this is a FAIL.
    pub null_rate_fail: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            null_rate_warn: 0.2,
            null_rate_fail: 0.5,
        }
    }
}

/// Aggregation behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// Delimiter used by the concatenate strategy.
    pub concat_delimiter: String,
    /// When true, aggregated value columns are renamed `{col}_{strategy}`.
    pub suffix_columns: bool,
    /// Decimal places to round `mean` results to; `None` leaves them as-is.
    pub mean_precision: Option<u32>,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            concat_delimiter: "; ".to_string(),
            suffix_columns: false,
            mean_precision: None,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeldConfig {
    pub detector: DetectorConfig,
    pub health: HealthConfig,
    pub aggregate: AggregateConfig,
}
