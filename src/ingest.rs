//! CSV ingestion: reads an upstream-cleaned CSV export into a SchemaFrame.
//!
//! This is a producer-side convenience for the CLI and tests. The semantic
//! type of each column comes from a declared schema; the loader only parses
//! values and enforces the input contract, it never guesses types.

use crate::error::{MeldError, Result};
use crate::frame::{Column, SchemaFrame, SemanticType, Value};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%m/%d/%Y"];

/// Declared column types for a CSV source. Columns not listed are read as
/// free text.
pub type SchemaDecl = HashMap<String, SemanticType>;

/// Read a CSV file into a frame named after it.
pub fn read_csv_file(path: impl AsRef<Path>, schema: &SchemaDecl) -> Result<SchemaFrame> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string());
    let file = std::fs::File::open(path)?;
    read_csv(file, &name, schema)
}

/// Read CSV text from any reader.
pub fn read_csv(reader: impl Read, name: &str, schema: &SchemaDecl) -> Result<SchemaFrame> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let dtypes: Vec<SemanticType> = headers
        .iter()
        .map(|h| schema.get(h).copied().unwrap_or(SemanticType::Text))
        .collect();

    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
    for (row_idx, result) in rdr.records().enumerate() {
        let record = result?;
        for (col_idx, dtype) in dtypes.iter().enumerate() {
            let cell = record.get(col_idx).unwrap_or("");
            let value = parse_cell(cell, *dtype).map_err(|reason| MeldError::Ingest(format!(
                "{name}: row {}, column '{}': {reason}",
                row_idx + 1,
                headers[col_idx]
            )))?;
            columns[col_idx].push(value);
        }
    }

    let columns = headers
        .into_iter()
        .zip(dtypes)
        .zip(columns)
        .map(|((header, dtype), values)| Column::new(header, dtype, values))
        .collect();
    let frame = SchemaFrame::new(name, columns)?;
    debug!(frame = %frame.name, rows = frame.n_rows(), cols = frame.n_cols(), "csv loaded");
    Ok(frame)
}

fn parse_cell(cell: &str, dtype: SemanticType) -> std::result::Result<Value, String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    match dtype {
        SemanticType::Numeric => {
            if let Ok(i) = trimmed.parse::<i64>() {
                Ok(Value::Int(i))
            } else {
                trimmed
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| format!("'{trimmed}' is not numeric"))
            }
        }
        SemanticType::Date => DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
            .map(Value::Date)
            .ok_or_else(|| format!("'{trimmed}' is not a recognized date")),
        SemanticType::Identifier | SemanticType::Categorical | SemanticType::Text => {
            Ok(Value::Text(trimmed.to_string()))
        }
    }
}
