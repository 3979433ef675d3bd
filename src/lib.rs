//! datameld: aggregation and two-phase join engine for consolidating
//! heterogeneous customer tables (billing, usage, support) into a single
//! analysis-ready table.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod frame;
pub mod health;
pub mod ingest;
pub mod join;
pub mod key_detect;
pub mod plan;
pub mod suggest;

pub use aggregate::{AggregationSpec, Aggregator, Strategy};
pub use config::MeldConfig;
pub use error::{MeldError, Result};
pub use frame::{Column, SchemaFrame, SemanticType, Value};
pub use health::{HealthReport, Verdict};
pub use join::{CancelFlag, JoinEngine, JoinOutcome, JoinPlan, JoinType};
pub use key_detect::{CandidateKey, KeyDetector};
pub use plan::{CategoryInput, PlanBuilder};
