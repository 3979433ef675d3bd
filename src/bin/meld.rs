use anyhow::{bail, Context, Result};
use clap::Parser;
use datameld::aggregate::{AggregationSpec, Aggregator};
use datameld::config::MeldConfig;
use datameld::ingest::{read_csv_file, SchemaDecl};
use datameld::join::{CancelFlag, JoinEngine};
use datameld::plan::{CategoryInput, PlanBuilder};
use datameld::suggest::NoSuggestions;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// Consolidate per-category CSV exports into one analysis-ready table.
#[derive(Parser)]
#[command(name = "meld")]
#[command(about = "Aggregate and join customer data tables across categories")]
struct Args {
    /// Input table as category=path, repeatable (e.g. billing=b1.csv)
    #[arg(long = "table", value_parser = parse_table)]
    tables: Vec<(String, PathBuf)>,

    /// Date column per category as category=column, repeatable
    #[arg(long = "date-column", value_parser = parse_column)]
    date_columns: Vec<(String, String)>,

    /// Entity key column shared by every category
    #[arg(long, default_value = "CustomerID")]
    entity_key: String,

    /// Optional product key column for product-level analysis
    #[arg(long)]
    product_key: Option<String>,

    /// Category the final table is anchored on
    #[arg(long, default_value = "billing")]
    primary: String,

    /// JSON file mapping column name -> semantic type
    #[arg(long)]
    schema: Option<PathBuf>,

    /// JSON file mapping category -> aggregation spec
    #[arg(long)]
    agg_spec: Option<PathBuf>,

    /// JSON file with engine configuration (thresholds)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the final frame and health reports as JSON (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_table(s: &str) -> std::result::Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), PathBuf::from(v))),
        None => Err(format!("expected category=path, got '{s}'")),
    }
}

fn parse_column(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected category=column, got '{s}'")),
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    if args.tables.is_empty() {
        bail!("no input tables; pass at least one --table category=path");
    }

    let config: MeldConfig = match &args.config {
        Some(path) => load_json(path)?,
        None => MeldConfig::default(),
    };
    let schema: SchemaDecl = match &args.schema {
        Some(path) => load_json(path)?,
        None => SchemaDecl::new(),
    };
    let agg_specs: HashMap<String, AggregationSpec> = match &args.agg_spec {
        Some(path) => load_json(path)?,
        None => HashMap::new(),
    };
    let date_columns: HashMap<String, String> = args.date_columns.into_iter().collect();

    // Load and, where a spec is declared, aggregate each category's files.
    let aggregator = Aggregator::new(config.aggregate.clone());
    let mut categories: Vec<CategoryInput> = Vec::new();
    for (category, path) in args.tables {
        let mut frame = read_csv_file(&path, &schema)
            .with_context(|| format!("loading {}", path.display()))?;
        info!(%category, frame = %frame.name, rows = frame.n_rows(), "loaded table");

        if let Some(spec) = agg_specs.get(&category) {
            if Aggregator::needs_aggregation(&frame, &spec.group_keys)? {
                let out = aggregator.aggregate(frame, spec, &NoSuggestions)?;
                for warning in &out.warnings {
                    eprintln!("warning [{category}]: {warning}");
                }
                frame = out.frame;
                info!(%category, rows = frame.n_rows(), "aggregated table");
            }
        }

        match categories.iter_mut().find(|c| c.name == category) {
            Some(entry) => entry.frames.push(frame),
            None => categories.push(CategoryInput {
                name: category.clone(),
                frames: vec![frame],
                date_column: date_columns.get(&category).cloned(),
            }),
        }
    }

    let mut builder = PlanBuilder::new(args.entity_key.as_str(), args.primary.as_str())
        .with_key_detection(datameld::KeyDetector::new(config.detector.clone()));
    if let Some(product) = &args.product_key {
        builder = builder.with_product_key(product.as_str());
    }
    let plan = builder.build(categories)?;
    info!(steps = plan.steps.len(), "join plan built");

    let engine = JoinEngine::new(config.health.clone());
    let outcome = engine.execute(plan, &CancelFlag::new())?;

    for report in &outcome.reports {
        info!(
            step = report.step,
            verdict = ?report.verdict,
            rows = report.metrics.post_rows,
            "health: {} x {}",
            report.left_frame,
            report.right_frame
        );
        for finding in &report.findings {
            eprintln!(
                "step {} [{:?}] {}: {}",
                report.step, finding.severity, finding.metric, finding.detail
            );
        }
    }

    let result = serde_json::json!({
        "frame": outcome.frame,
        "reports": outcome.reports,
    });
    match &args.output {
        Some(path) => {
            std::fs::write(path, serde_json::to_string_pretty(&result)?)?;
            info!(path = %path.display(), "wrote consolidated output");
        }
        None => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}
