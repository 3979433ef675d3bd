use chrono::NaiveDate;
use datameld::aggregate::{AggregationSpec, Aggregator, Strategy};
use datameld::config::{AggregateConfig, DetectorConfig, HealthConfig};
use datameld::frame::{Column, SchemaFrame, SemanticType, Value};
use datameld::health::Verdict;
use datameld::ingest::{read_csv, SchemaDecl};
use datameld::join::{CancelFlag, JoinEngine, JoinPhase};
use datameld::key_detect::KeyDetector;
use datameld::plan::{CategoryInput, PlanBuilder};
use datameld::suggest::NoSuggestions;
use std::collections::HashMap;

fn ids(name: &str, values: &[&str]) -> Column {
    Column::new(
        name,
        SemanticType::Identifier,
        values.iter().map(|v| Value::Text((*v).into())).collect(),
    )
}

fn dates(name: &str, values: &[(i32, u32, u32)]) -> Column {
    Column::new(
        name,
        SemanticType::Date,
        values
            .iter()
            .map(|(y, m, d)| Value::Date(NaiveDate::from_ymd_opt(*y, *m, *d).unwrap()))
            .collect(),
    )
}

fn nums(name: &str, values: &[f64]) -> Column {
    Column::new(
        name,
        SemanticType::Numeric,
        values.iter().map(|v| Value::Float(*v)).collect(),
    )
}

/// Three categories end to end: raw billing rows are aggregated to customer
/// by month, usage and support attach through left joins with their date
/// columns aligned to BillingDate, and every category contributes a
/// presence flag.
#[test]
fn three_category_consolidation() {
    // Two raw billing rows per customer per month collapse to one.
    let billing = SchemaFrame::new(
        "billing",
        vec![
            ids("CustomerID", &["A", "A", "B", "B"]),
            dates(
                "BillingDate",
                &[(2024, 2, 1), (2024, 2, 1), (2024, 2, 1), (2024, 2, 1)],
            ),
            nums("Revenue", &[60.0, 40.0, 200.0, 100.0]),
        ],
    )
    .unwrap();
    let spec = AggregationSpec {
        group_keys: vec!["CustomerID".to_string(), "BillingDate".to_string()],
        strategies: HashMap::from([("Revenue".to_string(), Strategy::Sum)]),
        order_by: None,
    };
    let billing = Aggregator::new(AggregateConfig::default())
        .aggregate(billing, &spec, &NoSuggestions)
        .unwrap()
        .frame;
    assert_eq!(billing.n_rows(), 2);

    // Usage is daily; the monthly billing dates force month-level matching.
    let usage = SchemaFrame::new(
        "usage",
        vec![
            ids("CustomerID", &["A"]),
            dates("UsageDate", &[(2024, 2, 17)]),
            nums("Minutes", &[42.0]),
        ],
    )
    .unwrap();
    let support = SchemaFrame::new(
        "support",
        vec![
            ids("CustomerID", &["B"]),
            dates("TicketOpenDate", &[(2024, 2, 9)]),
            nums("Tickets", &[3.0]),
        ],
    )
    .unwrap();

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
            CategoryInput {
                name: "support".to_string(),
                frames: vec![support],
                date_column: Some("TicketOpenDate".to_string()),
            },
        ])
        .unwrap();
    assert_eq!(plan.steps.len(), 2);
    assert!(plan.steps.iter().all(|s| s.phase == JoinPhase::Inter));

    let outcome = JoinEngine::new(HealthConfig::default())
        .execute(plan, &CancelFlag::new())
        .unwrap();
    let frame = &outcome.frame;
    assert_eq!(frame.n_rows(), 2);

    // A has usage but no support; B the reverse.
    assert_eq!(
        frame.column("has_usage_data").unwrap().values,
        vec![Value::Bool(true), Value::Bool(false)]
    );
    assert_eq!(
        frame.column("has_support_data").unwrap().values,
        vec![Value::Bool(false), Value::Bool(true)]
    );
    assert_eq!(frame.column("Minutes").unwrap().values[0], Value::Float(42.0));
    assert_eq!(frame.column("Tickets").unwrap().values[1], Value::Float(3.0));

    assert_eq!(outcome.reports.len(), 2);
    assert!(outcome.reports.iter().all(|r| r.verdict == Verdict::Pass));
}

/// CSV ingestion feeding the pipeline, with the second file's key column
/// named differently and bridged by the detector.
#[test]
fn csv_sources_with_detected_key() {
    let mut schema = SchemaDecl::new();
    schema.insert("CustomerID".to_string(), SemanticType::Identifier);
    schema.insert("cust_id".to_string(), SemanticType::Identifier);
    schema.insert("Revenue".to_string(), SemanticType::Numeric);
    schema.insert("Credits".to_string(), SemanticType::Numeric);

    let file1 = read_csv(
        "CustomerID,Revenue\nA,100\nB,200\n".as_bytes(),
        "billing_file1",
        &schema,
    )
    .unwrap();
    let file2 = read_csv(
        "cust_id,Credits\nA,5\nB,7\n".as_bytes(),
        "billing_file2",
        &schema,
    )
    .unwrap();
    let usage = read_csv(
        "CustomerID,Revenue\nA,1\n".as_bytes(),
        "usage",
        &schema,
    )
    .unwrap();

    let plan = PlanBuilder::new("CustomerID", "billing")
        .with_key_detection(KeyDetector::new(DetectorConfig::default()))
        .build(vec![
            CategoryInput {
                name: "billing".to_string(),
                frames: vec![file1, file2],
                date_column: None,
            },
            CategoryInput {
                name: "usage".to_string(),
                frames: vec![usage],
                date_column: None,
            },
        ])
        .unwrap();

    let outcome = JoinEngine::new(HealthConfig::default())
        .execute(plan, &CancelFlag::new())
        .unwrap();
    let frame = &outcome.frame;
    assert_eq!(frame.n_rows(), 2);
    assert_eq!(frame.column("Credits").unwrap().values[0], Value::Int(5));
    // Revenue appears in both billing and usage; non-key collision gets
    // suffixed rather than overwritten.
    assert!(frame.column("Revenue_left").is_some());
    assert!(frame.column("Revenue_right").is_some());
}
