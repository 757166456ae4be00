//! Record tables on disk: `latest.csv` and `daily/YYYYMMDD.csv`.
//!
//! Layout under the output root:
//! - `latest.csv`: merged tables for the dates touched by the last run
//! - `daily/YYYYMMDD.csv`: per-date detail, one row per slot (latest timestamp wins)
//! - `history.csv`, `logs/`, `debug/`, `latest.json`, `history.json`
//!
//! Every write goes to `<file>.tmp` first and is renamed into place, so a
//! reader never sees a half-written table.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, warn};

use marketpulse_core::record::RECORD_COLUMNS;
use marketpulse_core::{MetricRecord, RawRecord, SlotKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("serialize {what}: {message}")]
    Serialize { what: &'static str, message: String },

    #[error("unreadable row {row} in {path}: {message}")]
    Corrupt {
        path: PathBuf,
        row: usize,
        message: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        StoreError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ─── Layout ──────────────────────────────────────────────────────────

/// Paths of every artifact under the output root.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn latest_csv(&self) -> PathBuf {
        self.root.join("latest.csv")
    }

    pub fn history_csv(&self) -> PathBuf {
        self.root.join("history.csv")
    }

    pub fn latest_json(&self) -> PathBuf {
        self.root.join("latest.json")
    }

    pub fn history_json(&self) -> PathBuf {
        self.root.join("history.json")
    }

    pub fn daily_dir(&self) -> PathBuf {
        self.root.join("daily")
    }

    pub fn daily_csv(&self, date: NaiveDate) -> PathBuf {
        self.daily_dir()
            .join(format!("{}.csv", date.format("%Y%m%d")))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.root.join("debug")
    }
}

// ─── Atomic write ────────────────────────────────────────────────────

/// Write `bytes` to `<path>.tmp`, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    fs::write(&tmp_path, bytes).map_err(|e| StoreError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        // Clean up temp file on rename failure
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, e)
    })
}

// ─── CSV encode / decode ─────────────────────────────────────────────

/// Render records as CSV bytes with the canonical header.
pub fn records_to_csv(records: &[MetricRecord]) -> Result<Vec<u8>, StoreError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(vec![]);
    let as_ser = |e: csv::Error| StoreError::Serialize {
        what: "records",
        message: e.to_string(),
    };
    wtr.write_record(RECORD_COLUMNS).map_err(as_ser)?;
    for rec in records {
        let raw = rec.to_raw();
        wtr.serialize(&raw).map_err(as_ser)?;
    }
    wtr.into_inner().map_err(|e| StoreError::Serialize {
        what: "records",
        message: e.to_string(),
    })
}

/// Parse a record table. Rows that violate the schema are skipped with a warning.
pub fn read_records(path: &Path) -> Result<Vec<MetricRecord>, StoreError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| StoreError::csv(path, e))?;

    let mut records = Vec::new();
    for (line, row) in rdr.deserialize::<RawRecord>().enumerate() {
        let raw = row.map_err(|e| StoreError::csv(path, e))?;
        match MetricRecord::try_from_raw(raw) {
            Ok(rec) => records.push(rec),
            Err(e) => warn!(path = %path.display(), row = line + 1, error = %e, "skipping invalid record"),
        }
    }
    Ok(records)
}

/// Like [`read_records`], but a missing file is an empty table.
pub fn read_records_if_exists(path: &Path) -> Result<Vec<MetricRecord>, StoreError> {
    if path.exists() {
        read_records(path)
    } else {
        Ok(Vec::new())
    }
}

/// Merge `incoming` into `existing` by slot: the later timestamp wins, and on
/// equal timestamps the incoming row wins. Output is sorted by slot then time.
pub fn merge_records(existing: Vec<MetricRecord>, incoming: Vec<MetricRecord>) -> Vec<MetricRecord> {
    let mut by_slot: HashMap<SlotKey, MetricRecord> = HashMap::new();
    for rec in existing.into_iter().chain(incoming) {
        match by_slot.get(&rec.slot_key()) {
            Some(cur) if cur.timestamp > rec.timestamp => {}
            _ => {
                by_slot.insert(rec.slot_key(), rec);
            }
        }
    }
    let mut merged: Vec<MetricRecord> = by_slot.into_values().collect();
    merged.sort_by(|a, b| {
        (&a.asset, &a.key, &a.window, a.timestamp).cmp(&(&b.asset, &b.key, &b.window, b.timestamp))
    });
    merged
}

// ─── Store ───────────────────────────────────────────────────────────

/// What one persisted batch touched.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistOutcome {
    pub daily_files: Vec<PathBuf>,
    pub latest_rows: usize,
    /// blake3 of the `latest.csv` bytes.
    pub content_hash: String,
    pub pruned: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    layout: OutputLayout,
    daily_retention: usize,
}

impl RecordStore {
    pub fn new(layout: OutputLayout, daily_retention: usize) -> Self {
        Self {
            layout,
            daily_retention,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn load_latest(&self) -> Result<Vec<MetricRecord>, StoreError> {
        read_records_if_exists(&self.layout.latest_csv())
    }

    pub fn load_daily(&self, date: NaiveDate) -> Result<Vec<MetricRecord>, StoreError> {
        read_records_if_exists(&self.layout.daily_csv(date))
    }

    /// Merge the batch into each touched daily table, rewrite `latest.csv`
    /// from those merged tables, then prune old daily files.
    pub fn persist(&self, batch: Vec<MetricRecord>) -> Result<PersistOutcome, StoreError> {
        let mut by_date: BTreeMap<NaiveDate, Vec<MetricRecord>> = BTreeMap::new();
        for rec in batch {
            by_date.entry(rec.date()).or_default().push(rec);
        }

        let mut latest = Vec::new();
        let mut daily_files = Vec::new();
        for (date, records) in by_date {
            let path = self.layout.daily_csv(date);
            let merged = merge_records(self.load_daily(date)?, records);
            write_atomic(&path, &records_to_csv(&merged)?)?;
            debug!(path = %path.display(), rows = merged.len(), "daily table written");
            daily_files.push(path);
            latest.extend(merged);
        }

        let bytes = records_to_csv(&latest)?;
        let content_hash = blake3::hash(&bytes).to_hex().to_string();
        // An empty batch still replaces latest.csv with a header-only table.
        write_atomic(&self.layout.latest_csv(), &bytes)?;
        let pruned = self.prune_daily()?;

        Ok(PersistOutcome {
            daily_files,
            latest_rows: latest.len(),
            content_hash,
            pruned,
        })
    }

    /// Delete the oldest `YYYYMMDD.csv` files beyond the retention count.
    pub fn prune_daily(&self) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.layout.daily_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<(NaiveDate, PathBuf)> = fs::read_dir(&dir)
            .map_err(|e| StoreError::io(&dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?;
                let is_csv = path.extension().is_some_and(|ext| ext == "csv");
                let date = NaiveDate::parse_from_str(stem, "%Y%m%d").ok()?;
                is_csv.then_some((date, path))
            })
            .collect();
        if files.len() <= self.daily_retention {
            return Ok(Vec::new());
        }
        files.sort();
        let excess = files.len() - self.daily_retention;
        let mut removed = Vec::with_capacity(excess);
        for (_, path) in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) => warn!(path = %path.display(), error = %e, "could not prune daily file"),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketpulse_core::record::parse_timestamp;
    use marketpulse_core::{Quality, StatusTag};
    use tempfile::TempDir;

    fn rec(key: &str, value: Option<f64>, ts: &str) -> MetricRecord {
        MetricRecord::new(parse_timestamp(ts).unwrap(), "KOSPI", key, value, "krx", Quality::Primary)
            .with_window("EOD")
    }

    #[test]
    fn csv_roundtrip_keeps_nulls_and_tags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        let records = vec![
            rec("idx", Some(2650.31), "2024-01-02 15:30"),
            rec("trin", None, "2024-01-02 15:30").with_tag(StatusTag::parse_failed("krx", "timeout")),
        ];
        write_atomic(&path, &records_to_csv(&records).unwrap()).unwrap();
        assert_eq!(read_records(&path).unwrap(), records);
        assert!(!dir.path().join("t.csv.tmp").exists());
    }

    #[test]
    fn header_matches_column_order() {
        let bytes = records_to_csv(&[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.trim_end(), RECORD_COLUMNS.join(","));
    }

    #[test]
    fn invalid_rows_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(
            &path,
            "ts_kst,asset,key,value,source,quality\n\
             2024-01-02 15:30,KOSPI,idx,\"2,650.31\",krx,primary\n\
             2024-01-02 15:30,KOSPI,idx,1,krx,bogus\n",
        )
        .unwrap();
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, Some(2650.31));
    }

    #[test]
    fn merge_keeps_latest_per_slot() {
        let existing = vec![rec("idx", Some(1.0), "2024-01-02 16:00")];
        let incoming = vec![
            rec("idx", Some(2.0), "2024-01-02 15:30"),
            rec("trin", Some(0.9), "2024-01-02 15:30"),
        ];
        let merged = merge_records(existing, incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].value, Some(1.0));
    }

    #[test]
    fn merge_prefers_incoming_on_equal_timestamp() {
        let existing = vec![rec("idx", Some(1.0), "2024-01-02 16:00")];
        let incoming = vec![rec("idx", Some(2.0), "2024-01-02 16:00")];
        assert_eq!(merge_records(existing, incoming)[0].value, Some(2.0));
    }

    #[test]
    fn empty_batch_clears_latest_table() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(OutputLayout::new(dir.path()), 10);
        store.persist(vec![rec("idx", Some(2650.31), "2024-01-02 15:30")]).unwrap();
        assert_eq!(store.load_latest().unwrap().len(), 1);

        let outcome = store.persist(Vec::new()).unwrap();
        assert_eq!(outcome.latest_rows, 0);
        assert!(store.load_latest().unwrap().is_empty());
        let text = fs::read_to_string(store.layout().latest_csv()).unwrap();
        assert_eq!(text.trim_end(), RECORD_COLUMNS.join(","));
        assert_eq!(store.load_daily(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).unwrap().len(), 1);
    }

    #[test]
    fn prune_keeps_newest_files() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::new(OutputLayout::new(dir.path()), 2);
        fs::create_dir_all(store.layout().daily_dir()).unwrap();
        for day in ["20240101", "20240102", "20240103", "notes"] {
            fs::write(store.layout().daily_dir().join(format!("{day}.csv")), "").unwrap();
        }
        let removed = store.prune_daily().unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!store.layout().daily_dir().join("20240101.csv").exists());
        assert!(store.layout().daily_dir().join("notes.csv").exists());
    }
}
