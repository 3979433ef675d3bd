//! PlanBuilder: turns per-category aggregated frames into a two-phase
//! JoinPlan.
//!
//! Phase one consolidates the files of each category (outer joins on
//! identifier + date, so no rows are lost within a category). Phase two
//! attaches every other category to the primary one (left joins anchored on
//! the primary, typically billing), aligning each category's date column
//! with the primary's.

use crate::error::{MeldError, Result};
use crate::frame::SchemaFrame;
use crate::join::{JoinPhase, JoinPlan, JoinStep, JoinType, StepInput};
use crate::key_detect::KeyDetector;
use tracing::debug;

/// One category's input: its frames (one per uploaded file) and the name of
/// its date column, when it has one.
#[derive(Debug)]
pub struct CategoryInput {
    pub name: String,
    pub frames: Vec<SchemaFrame>,
    pub date_column: Option<String>,
}

pub struct PlanBuilder {
    entity_key: String,
    product_key: Option<String>,
    primary: String,
    detector: Option<KeyDetector>,
}

impl PlanBuilder {
    pub fn new(entity_key: impl Into<String>, primary: impl Into<String>) -> Self {
        Self {
            entity_key: entity_key.into(),
            product_key: None,
            primary: primary.into(),
            detector: None,
        }
    }

    /// Product-level analysis: the product identifier joins alongside the
    /// entity key.
    pub fn with_product_key(mut self, key: impl Into<String>) -> Self {
        self.product_key = Some(key.into());
        self
    }

    /// Fall back to heuristic key detection when the declared key columns
    /// are missing from a frame pair.
    pub fn with_key_detection(mut self, detector: KeyDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Build the two-phase plan. Frames are consumed; the plan owns them.
    pub fn build(self, categories: Vec<CategoryInput>) -> Result<JoinPlan> {
        if !categories.iter().any(|c| c.name == self.primary) {
            return Err(MeldError::Plan(format!(
                "Primary category '{}' not present",
                self.primary
            )));
        }

        let mut steps: Vec<JoinStep> = Vec::new();
        // Consolidated handle per category, in input order.
        let mut consolidated: Vec<(String, Option<String>, StepInput)> = Vec::new();

        for category in categories {
            let CategoryInput {
                name,
                mut frames,
                date_column,
            } = category;
            if frames.is_empty() {
                return Err(MeldError::Plan(format!("Category '{name}' has no frames")));
            }

            let mut canonical: Vec<&str> = vec![self.entity_key.as_str()];
            if let Some(p) = &self.product_key {
                canonical.push(p.as_str());
            }
            if let Some(d) = &date_column {
                canonical.push(d.as_str());
            }
            for frame in &mut frames {
                frame.standardize_columns(&canonical);
            }

            // Intra-category phase: chain the category's files together.
            let mut frames = frames.into_iter();
            let mut handle = StepInput::Frame(frames.next().expect("non-empty"));
            for next in frames {
                let keys = self.intra_keys(&handle, &next, &date_column)?;
                debug!(category = %name, ?keys, "intra-category join step");
                steps.push(JoinStep {
                    left: handle,
                    right: StepInput::Frame(next),
                    keys,
                    join_type: JoinType::Outer,
                    phase: JoinPhase::Intra,
                    presence_flag: None,
                });
                handle = StepInput::StepOutput(steps.len() - 1);
            }
            consolidated.push((name, date_column, handle));
        }

        // Inter-category phase: left joins anchored on the primary.
        let primary_pos = consolidated
            .iter()
            .position(|(name, _, _)| name == &self.primary)
            .expect("checked above");
        let (_, primary_date, mut anchor) = consolidated.remove(primary_pos);

        if consolidated.is_empty() && steps.is_empty() {
            return Err(MeldError::Plan(
                "Nothing to join: a single frame in a single category".to_string(),
            ));
        }

        for (name, date_column, handle) in consolidated {
            let mut keys = self.shared_keys();
            if let (Some(left_date), Some(right_date)) = (&primary_date, &date_column) {
                keys.push((left_date.clone(), right_date.clone()));
            }
            debug!(category = %name, ?keys, "inter-category join step");
            steps.push(JoinStep {
                left: anchor,
                right: handle,
                keys,
                join_type: JoinType::Left,
                phase: JoinPhase::Inter,
                presence_flag: Some(format!("has_{name}_data")),
            });
            anchor = StepInput::StepOutput(steps.len() - 1);
        }

        Ok(JoinPlan { steps })
    }

    fn shared_keys(&self) -> Vec<(String, String)> {
        let mut keys = vec![(self.entity_key.clone(), self.entity_key.clone())];
        if let Some(p) = &self.product_key {
            keys.push((p.clone(), p.clone()));
        }
        keys
    }

    /// Keys for an intra-category join: the declared identifier (+ product,
    /// + date) columns when both sides have them, otherwise detector
    /// fallback.
    fn intra_keys(
        &self,
        left: &StepInput,
        right: &SchemaFrame,
        date_column: &Option<String>,
    ) -> Result<Vec<(String, String)>> {
        let mut keys = self.shared_keys();
        if let Some(d) = date_column {
            keys.push((d.clone(), d.clone()));
        }

        // Declared keys only work when the right frame actually has them;
        // the left side is either a plan-owned frame (checkable now) or a
        // prior output that carries the same canonical columns.
        let declared_ok = keys.iter().all(|(_, r)| right.column(r).is_some())
            && match left {
                StepInput::Frame(f) => keys.iter().all(|(l, _)| f.column(l).is_some()),
                StepInput::StepOutput(_) => true,
            };
        if declared_ok {
            return Ok(keys);
        }

        let (Some(detector), StepInput::Frame(left_frame)) = (&self.detector, left) else {
            return Err(MeldError::Plan(format!(
                "Frame '{}' is missing declared key columns and no detector is configured",
                right.name
            )));
        };
        let candidates = detector.detect(left_frame, right);
        let Some(best) = candidates.first() else {
            return Err(MeldError::Plan(format!(
                "No join key could be detected between '{}' and '{}'; supply a manual key",
                left_frame.name, right.name
            )));
        };
        debug!(
            left = %best.left_column,
            right = %best.right_column,
            confidence = best.confidence,
            "using detected join key"
        );
        Ok(vec![(best.left_column.clone(), best.right_column.clone())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::frame::{Column, SemanticType, Value};

    fn ids(name: &str, values: &[&str]) -> Column {
        Column::new(
            name,
            SemanticType::Identifier,
            values.iter().map(|v| Value::Text((*v).into())).collect(),
        )
    }

    fn frame(name: &str, columns: Vec<Column>) -> SchemaFrame {
        SchemaFrame::new(name, columns).unwrap()
    }

    fn category(name: &str, frames: Vec<SchemaFrame>) -> CategoryInput {
        CategoryInput {
            name: name.to_string(),
            frames,
            date_column: None,
        }
    }

    #[test]
    fn two_files_then_two_categories_yields_intra_then_inter() {
        let billing1 = frame("billing1", vec![ids("CustomerID", &["A", "B"])]);
        let billing2 = frame("billing2", vec![ids("CustomerID", &["B", "C"])]);
        let usage = frame("usage", vec![ids("CustomerID", &["A"])]);

        let plan = PlanBuilder::new("CustomerID", "billing")
            .build(vec![
                category("billing", vec![billing1, billing2]),
                category("usage", vec![usage]),
            ])
            .unwrap();

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].phase, JoinPhase::Intra);
        assert_eq!(plan.steps[0].join_type, JoinType::Outer);
        assert_eq!(plan.steps[1].phase, JoinPhase::Inter);
        assert_eq!(plan.steps[1].join_type, JoinType::Left);
        assert!(matches!(plan.steps[1].left, StepInput::StepOutput(0)));
        assert_eq!(
            plan.steps[1].presence_flag.as_deref(),
            Some("has_usage_data")
        );
    }

    #[test]
    fn inter_step_aligns_date_columns_as_a_key_pair() {
        let billing = frame("billing", vec![ids("CustomerID", &["A"])]);
        let usage = frame("usage", vec![ids("CustomerID", &["A"])]);
        let plan = PlanBuilder::new("CustomerID", "billing")
            .build(vec![
                CategoryInput {
                    name: "billing".to_string(),
                    frames: vec![billing],
                    date_column: Some("BillingDate".to_string()),
                },
                CategoryInput {
                    name: "usage".to_string(),
                    frames: vec![usage],
                    date_column: Some("UsageDate".to_string()),
                },
            ])
            .unwrap();
        let keys = &plan.steps[0].keys;
        assert!(keys.contains(&("BillingDate".to_string(), "UsageDate".to_string())));
    }

    #[test]
    fn missing_primary_category_is_an_error() {
        let usage = frame("usage", vec![ids("CustomerID", &["A"])]);
        let err = PlanBuilder::new("CustomerID", "billing")
            .build(vec![category("usage", vec![usage])]);
        assert!(matches!(err, Err(MeldError::Plan(_))));
    }

    #[test]
    fn detector_fallback_kicks_in_when_declared_keys_are_absent() {
        // Second billing file names its key differently; detection bridges it.
        let billing1 = frame("billing1", vec![ids("CustomerID", &["A", "B"])]);
        let billing2 = frame("billing2", vec![ids("cust_id", &["A", "B"])]);
        let usage = frame("usage", vec![ids("CustomerID", &["A"])]);

        let plan = PlanBuilder::new("CustomerID", "billing")
            .with_key_detection(KeyDetector::new(DetectorConfig::default()))
            .build(vec![
                category("billing", vec![billing1, billing2]),
                category("usage", vec![usage]),
            ])
            .unwrap();
        assert_eq!(
            plan.steps[0].keys,
            vec![("CustomerID".to_string(), "cust_id".to_string())]
        );
    }

    #[test]
    fn no_detectable_key_surfaces_a_manual_key_request() {
        let billing1 = frame("billing1", vec![ids("CustomerID", &["A", "B"])]);
        let billing2 = frame("billing2", vec![ids("ref", &["X", "Y"])]);
        let err = PlanBuilder::new("CustomerID", "billing")
            .with_key_detection(KeyDetector::new(DetectorConfig::default()))
            .build(vec![category("billing", vec![billing1, billing2])]);
        assert!(matches!(err, Err(MeldError::Plan(_))));
    }
}
