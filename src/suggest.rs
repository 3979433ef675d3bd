//! Advisory suggestion seam.
//!
//! The AI assistant that proposes aggregation strategies and join-key hints
//! lives outside this crate. The engine only consumes its decisions through
//! [`SuggestionProvider`], so the core stays deterministic and fully
//! functional (with less automation) when no provider is wired in.

use crate::aggregate::Strategy;
use crate::frame::{SemanticType, Value};
use serde::{Deserialize, Serialize};

/// A few sample values and type info for one column, handed to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSample {
    pub name: String,
    pub dtype: SemanticType,
    pub samples: Vec<Value>,
}

/// Strategy recommendation for one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyHint {
    /// Recommended strategy; must be one of the closed strategy set.
    pub strategy: Strategy,
    /// Confidence score (0.0 to 1.0).
    pub confidence: f64,
    /// Reasoning for the recommendation, surfaced to the human reviewer.
    pub reasoning: String,
}

/// Join-key recommendation: a pair of column names the provider believes
/// identify the same entity on both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyHint {
    pub left_column: String,
    pub right_column: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Injected advisory function. Implementations may call an external model;
/// the engine treats every answer as a hint, never as ground truth.
pub trait SuggestionProvider {
    /// Recommend a resolution strategy for a column that the aggregation
    /// spec marked as `Suggested`. Returning `None` means "no opinion".
    fn suggest_strategy(&self, sample: &ColumnSample) -> Option<StrategyHint>;

    /// Recommend join-key pairs between two tables. Hints can only boost
    /// candidates the detector already found; they never create one.
    fn suggest_keys(&self, left: &[ColumnSample], right: &[ColumnSample]) -> Vec<KeyHint>;
}

/// Null provider: the engine runs with no automation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSuggestions;

impl SuggestionProvider for NoSuggestions {
    fn suggest_strategy(&self, _sample: &ColumnSample) -> Option<StrategyHint> {
        None
    }

    fn suggest_keys(&self, _left: &[ColumnSample], _right: &[ColumnSample]) -> Vec<KeyHint> {
        Vec::new()
    }
}

/// Deterministic provider backed by fixed answers. Used in tests and in
/// non-interactive runs where an analyst has pre-approved the strategies.
#[derive(Debug, Clone, Default)]
pub struct FixedSuggestions {
    pub strategies: std::collections::HashMap<String, StrategyHint>,
    pub keys: Vec<KeyHint>,
}

impl SuggestionProvider for FixedSuggestions {
    fn suggest_strategy(&self, sample: &ColumnSample) -> Option<StrategyHint> {
        self.strategies.get(&sample.name).cloned()
    }

    fn suggest_keys(&self, _left: &[ColumnSample], _right: &[ColumnSample]) -> Vec<KeyHint> {
        self.keys.clone()
    }
}
