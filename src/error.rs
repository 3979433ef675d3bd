use thiserror::Error;

use crate::join::JoinOutcome;

#[derive(Error, Debug)]
pub enum MeldError {
    #[error("Schema violation in frame '{frame}': {reason}")]
    SchemaViolation { frame: String, reason: String },

    #[error("Aggregation error on column '{column}': {reason}")]
    Aggregation { column: String, reason: String },

    #[error("Join health failure at step {step}: {metric}")]
    JoinHealth {
        step: usize,
        metric: String,
        /// Frames and reports produced up to and including the failing step.
        partial: Box<JoinOutcome>,
    },

    #[error("Cancellation requested before step {step}")]
    Cancelled { step: usize },

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Ingestion error: {0}")]
    Ingest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, MeldError>;
