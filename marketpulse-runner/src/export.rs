//! JSON export of the CSV artifacts for consumers that cannot read CSV.
//!
//! - `latest.csv` → `latest.json`
//! - `history.csv` → `history.json`
//!
//! Both are arrays of row objects. A column is numeric when any of its cells
//! parses as a number once thousands separators are stripped; in a numeric
//! column the cells that do not parse become `null`. Numbers are rounded to
//! 4 decimal places. Blank cells are `null` everywhere.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Number, Value};
use tracing::info;

use crate::store::{write_atomic, OutputLayout};

const DECIMALS: i32 = 4;

/// Rows written per file; `None` when the source CSV does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub latest_rows: Option<usize>,
    pub history_rows: Option<usize>,
}

/// Convert `latest.csv` and `history.csv` under the layout root.
pub fn export_json(layout: &OutputLayout) -> Result<ExportSummary> {
    Ok(ExportSummary {
        latest_rows: export_file(&layout.latest_csv(), &layout.latest_json())?,
        history_rows: export_file(&layout.history_csv(), &layout.history_json())?,
    })
}

fn export_file(csv_path: &Path, json_path: &Path) -> Result<Option<usize>> {
    if !csv_path.exists() {
        info!(path = %csv_path.display(), "nothing to export");
        return Ok(None);
    }
    let bytes = std::fs::read(csv_path)
        .with_context(|| format!("failed to read {}", csv_path.display()))?;
    let rows = csv_to_json(&bytes)
        .with_context(|| format!("failed to convert {}", csv_path.display()))?;
    let json = serde_json::to_vec_pretty(&rows).context("failed to serialize JSON rows")?;
    write_atomic(json_path, &json)?;
    info!(path = %json_path.display(), rows = rows.len(), "exported");
    Ok(Some(rows.len()))
}

/// Convert CSV bytes (with header) into row objects keyed by column name.
pub fn csv_to_json(bytes: &[u8]) -> Result<Vec<Map<String, Value>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers: Vec<String> = rdr
        .headers()
        .context("failed to read CSV header")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut cells: Vec<Vec<String>> = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV row {}", line + 1))?;
        cells.push(
            (0..headers.len())
                .map(|i| record.get(i).unwrap_or("").trim().to_string())
                .collect(),
        );
    }

    let numeric: Vec<bool> = (0..headers.len())
        .map(|col| cells.iter().any(|row| parse_number(&row[col]).is_some()))
        .collect();

    Ok(cells
        .into_iter()
        .map(|row| {
            headers
                .iter()
                .zip(row)
                .zip(&numeric)
                .map(|((name, cell), &is_numeric)| (name.clone(), to_value(cell, is_numeric)))
                .collect()
        })
        .collect())
}

fn to_value(cell: String, numeric: bool) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if numeric {
        return parse_number(&cell)
            .and_then(|v| Number::from_f64(round(v)))
            .map_or(Value::Null, Value::Number);
    }
    Value::String(cell)
}

fn parse_number(cell: &str) -> Option<f64> {
    if cell.is_empty() {
        return None;
    }
    cell.replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn round(v: f64) -> f64 {
    let scale = 10f64.powi(DECIMALS);
    (v * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn numeric_columns_are_coerced_and_rounded() {
        let csv = "time_kst,kospi,src_tag\n\
                   2024-03-04 15:30:00,\"2,650.123456\",krx|yahoo\n\
                   2024-03-05 15:30:00,n/a,\n";
        let rows = csv_to_json(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["time_kst"], json!("2024-03-04 15:30:00"));
        assert_eq!(rows[0]["kospi"], json!(2650.1235));
        assert_eq!(rows[0]["src_tag"], json!("krx|yahoo"));
        assert_eq!(rows[1]["kospi"], Value::Null);
        assert_eq!(rows[1]["src_tag"], Value::Null);
    }

    #[test]
    fn text_column_keeps_strings() {
        let rows = csv_to_json(b"asset,value\nKOSPI,1\nDXY,\n").unwrap();
        assert_eq!(rows[0]["asset"], json!("KOSPI"));
        assert_eq!(rows[1]["value"], Value::Null);
    }

    #[test]
    fn missing_sources_are_skipped() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path());
        std::fs::write(layout.latest_csv(), "asset,value\nKOSPI,2650.31\n").unwrap();

        let summary = export_json(&layout).unwrap();
        assert_eq!(summary.latest_rows, Some(1));
        assert_eq!(summary.history_rows, None);
        assert!(layout.latest_json().exists());
        assert!(!layout.history_json().exists());

        let rows: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(layout.latest_json()).unwrap()).unwrap();
        assert_eq!(rows, vec![json!({"asset": "KOSPI", "value": 2650.31})]);
    }
}
