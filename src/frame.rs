//! SchemaFrame: the normalized in-memory table abstraction shared by all
//! pipeline stages. Frames move by value between stages; nothing downstream
//! holds a reference into an upstream stage's state.

use crate::error::{MeldError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Semantic type of a column, declared upstream by the Cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Identifier,
    Date,
    Numeric,
    Categorical,
    Text,
}

/// Calendar granularity of a date column.
///
/// Ordering is finest-to-coarsest so `max` picks the coarser of two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DateGranularity {
    Day,
    Month,
    Year,
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Truncate a date value to the given granularity. Non-dates pass through.
    pub fn truncate_date(&self, granularity: DateGranularity) -> Value {
        match self {
            Value::Date(d) => {
                let truncated = match granularity {
                    DateGranularity::Day => *d,
                    DateGranularity::Month => {
                        NaiveDate::from_ymd_opt(d.year(), d.month(), 1).unwrap_or(*d)
                    }
                    DateGranularity::Year => {
                        NaiveDate::from_ymd_opt(d.year(), 1, 1).unwrap_or(*d)
                    }
                };
                Value::Date(truncated)
            }
            other => other.clone(),
        }
    }

    /// Canonical string form used for grouping and join matching.
    ///
    /// Identifiers and text are trimmed and case-folded; dates are truncated
    /// to `granularity` first when one is given. Returns `None` for nulls so
    /// callers cannot accidentally match null against null.
    pub fn key_repr(&self, granularity: Option<DateGranularity>) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(format!("{v}")),
            Value::Text(s) => Some(s.trim().to_lowercase()),
            Value::Date(_) => {
                let truncated = match granularity {
                    Some(g) => self.truncate_date(g),
                    None => self.clone(),
                };
                match truncated {
                    Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
                    _ => None,
                }
            }
            Value::Bool(b) => Some(b.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A named, typed column of values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: SemanticType,
    pub nullable: bool,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: SemanticType, values: Vec<Value>) -> Self {
        let nullable = values.iter().any(Value::is_null);
        Self {
            name: name.into(),
            dtype,
            nullable,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    pub fn null_rate(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.null_count() as f64 / self.values.len() as f64
        }
    }

    /// Distinct non-null canonical values, used for overlap scoring.
    pub fn distinct_keys(&self, granularity: Option<DateGranularity>) -> HashSet<String> {
        self.values
            .iter()
            .filter_map(|v| v.key_repr(granularity))
            .collect()
    }

    /// Infer the granularity of a date column from its values: if every date
    /// falls on the first of the month the column is monthly, if every date
    /// is January 1st it is yearly, otherwise daily. Non-date columns and
    /// all-null date columns return `None`.
    pub fn date_granularity(&self) -> Option<DateGranularity> {
        if self.dtype != SemanticType::Date {
            return None;
        }
        let mut saw_date = false;
        let mut monthly = true;
        let mut yearly = true;
        for v in &self.values {
            if let Value::Date(d) = v {
                saw_date = true;
                if d.day() != 1 {
                    monthly = false;
                    yearly = false;
                    break;
                }
                if d.month() != 1 {
                    yearly = false;
                }
            }
        }
        if !saw_date {
            return None;
        }
        if yearly {
            Some(DateGranularity::Year)
        } else if monthly {
            Some(DateGranularity::Month)
        } else {
            Some(DateGranularity::Day)
        }
    }
}

/// An ordered collection of equal-length columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaFrame {
    pub name: String,
    columns: Vec<Column>,
}

impl SchemaFrame {
    /// Build a frame, enforcing the structural invariants: unique column
    /// names and equal column lengths.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.clone()) {
                return Err(MeldError::SchemaViolation {
                    frame: name,
                    reason: format!("Duplicate column name '{}'", col.name),
                });
            }
        }
        if let Some(first) = columns.first() {
            let expected = first.values.len();
            for col in &columns {
                if col.values.len() != expected {
                    return Err(MeldError::SchemaViolation {
                        frame: name,
                        reason: format!(
                            "Column '{}' has {} rows, expected {}",
                            col.name,
                            col.values.len(),
                            expected
                        ),
                    });
                }
            }
        }
        Ok(Self { name, columns })
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Cell accessor; panics are avoided by returning Null out of range.
    pub fn value(&self, col: usize, row: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.columns
            .get(col)
            .and_then(|c| c.values.get(row))
            .unwrap_or(&NULL)
    }

    fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(col) = self.columns.iter_mut().find(|c| c.name == from) {
            col.name = to.to_string();
        }
    }

    /// Fold trailing-underscore variants of the given canonical names back to
    /// the canonical form (`CustomerID_` -> `CustomerID`). Upstream mapping
    /// tools emit these variants when a target name collides with an
    /// existing column.
    pub fn standardize_columns(&mut self, canonical: &[&str]) {
        for name in canonical {
            let variant = format!("{name}_");
            if self.column(name).is_none() && self.column(&variant).is_some() {
                tracing::debug!(frame = %self.name, from = %variant, to = %name, "standardizing column name");
                self.rename_column(&variant, name);
            }
        }
    }

    /// Enforce the input contract for join participation: the named key
    /// columns must exist, be identifier- or date-typed, and contain no
    /// nulls.
    pub fn validate_join_contract(&self, key_columns: &[String]) -> Result<()> {
        for key in key_columns {
            let col = self.column(key).ok_or_else(|| MeldError::SchemaViolation {
                frame: self.name.clone(),
                reason: format!("Join key column '{key}' not found"),
            })?;
            if !matches!(col.dtype, SemanticType::Identifier | SemanticType::Date) {
                return Err(MeldError::SchemaViolation {
                    frame: self.name.clone(),
                    reason: format!(
                        "Join key column '{key}' has type {:?}, expected Identifier or Date",
                        col.dtype
                    ),
                });
            }
            let nulls = col.null_count();
            if nulls > 0 {
                return Err(MeldError::SchemaViolation {
                    frame: self.name.clone(),
                    reason: format!("Join key column '{key}' contains {nulls} null values"),
                });
            }
        }
        Ok(())
    }

    /// Canonical key tuple for one row, or `None` if any component is null.
    pub fn row_key(
        &self,
        row: usize,
        key_columns: &[String],
        granularity: Option<DateGranularity>,
    ) -> Option<Vec<String>> {
        key_columns
            .iter()
            .map(|name| {
                let idx = self.column_index(name)?;
                self.value(idx, row).key_repr(granularity)
            })
            .collect()
    }
}
