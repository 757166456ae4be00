//! History ledger file — the wide `history.csv` table.
//!
//! Columns: `time_kst`, one per configured column, `src_tag`, `quality`.
//! Loading is tolerant: missing columns read as blank, unknown columns are
//! dropped, and a bare `YYYY-MM-DD` in `time_kst` is anchored at the snapshot
//! time. A row whose `time_kst` cannot be read at all fails the load, so the
//! file is never rewritten without it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::warn;

use marketpulse_core::{ColumnMap, HistoryLedger, Quality, Snapshot};

use crate::store::{write_atomic, StoreError};

const TIME_COLUMN: &str = "time_kst";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Full header for the given column set.
pub fn history_header(columns: &ColumnMap) -> Vec<String> {
    std::iter::once(TIME_COLUMN.to_string())
        .chain(columns.names().map(str::to_string))
        .chain(["src_tag".to_string(), "quality".to_string()])
        .collect()
}

/// Load `history.csv` into a ledger. A missing file is an empty ledger.
/// `anchor` is the wall-clock time given to date-only rows.
pub fn load_ledger(
    path: &Path,
    columns: &ColumnMap,
    retention: usize,
    anchor: NaiveTime,
) -> Result<HistoryLedger, StoreError> {
    if !path.exists() {
        return Ok(HistoryLedger::new(retention));
    }
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| StoreError::csv(path, e))?;
    let headers = rdr.headers().map_err(|e| StoreError::csv(path, e))?.clone();
    let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h.trim(), i)).collect();

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| StoreError::csv(path, e))?;
        let cell = |name: &str| cell_of(&index, &record, name).to_string();

        let raw_time = cell(TIME_COLUMN);
        let time_kst = parse_time(&raw_time, anchor).ok_or_else(|| StoreError::Corrupt {
            path: path.to_path_buf(),
            row: line + 1,
            message: format!("bad time_kst {raw_time:?}"),
        })?;
        let values: BTreeMap<String, Option<f64>> = columns
            .names()
            .map(|name| (name.to_string(), parse_cell(&cell(name))))
            .collect();
        let quality = match cell("quality").as_str() {
            "" => None,
            q => match q.parse::<Quality>() {
                Ok(quality) => Some(quality),
                Err(_) => {
                    warn!(path = %path.display(), row = line + 1, quality = q, "dropping unknown quality");
                    None
                }
            },
        };
        rows.push(Snapshot {
            time_kst,
            values,
            src_tag: cell("src_tag"),
            quality,
            chosen: BTreeMap::new(),
        });
    }
    Ok(HistoryLedger::from_rows(rows, retention))
}

/// Render the ledger as CSV bytes.
pub fn ledger_to_csv(ledger: &HistoryLedger, columns: &ColumnMap) -> Result<Vec<u8>, StoreError> {
    let as_ser = |e: csv::Error| StoreError::Serialize {
        what: "history",
        message: e.to_string(),
    };
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(history_header(columns)).map_err(as_ser)?;
    for row in ledger.rows() {
        let mut fields = Vec::with_capacity(columns.len() + 3);
        fields.push(row.time_kst.format(TIME_FORMAT).to_string());
        for name in columns.names() {
            fields.push(row.value(name).map(|v| v.to_string()).unwrap_or_default());
        }
        fields.push(row.src_tag.clone());
        fields.push(row.quality.map(|q| q.to_string()).unwrap_or_default());
        wtr.write_record(&fields).map_err(as_ser)?;
    }
    wtr.into_inner().map_err(|e| StoreError::Serialize {
        what: "history",
        message: e.to_string(),
    })
}

/// Write the full table atomically.
pub fn save_ledger(path: &Path, ledger: &HistoryLedger, columns: &ColumnMap) -> Result<(), StoreError> {
    write_atomic(path, &ledger_to_csv(ledger, columns)?)
}

fn cell_of<'r>(index: &HashMap<&str, usize>, record: &'r csv::StringRecord, name: &str) -> &'r str {
    index
        .get(name)
        .and_then(|i| record.get(*i))
        .map(str::trim)
        .unwrap_or("")
}

fn parse_time(s: &str, anchor: NaiveTime) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .ok()
        .or_else(|| marketpulse_core::record::parse_timestamp(s))
        .or_else(|| NaiveDate::parse_from_str(s, DATE_FORMAT).ok().map(|d| d.and_time(anchor)))
}

fn parse_cell(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    s.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}
