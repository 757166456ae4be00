//! Collector trait, bounded parallel collection, and the file-inbox collector.
//!
//! A collector is anything that can hand the pipeline raw records and raw
//! per-asset series for one run. Scrapers live outside this crate; they drop
//! their output into an inbox directory that [`FileCollector`] picks up.

use std::collections::BTreeMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use marketpulse_core::derive::plan::SYSTEM_SOURCE;
use marketpulse_core::{
    MetricRecord, Quality, RawRecord, RecordBuilder, Series, SeriesId, SeriesSet, StatusTag,
};

/// Structured collector failures. Each one becomes a synthetic error record.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("collector panicked: {0}")]
    Panicked(String),
}

impl CollectorError {
    /// Short machine reason used in the `parse_failed` tag.
    pub fn reason(&self) -> &'static str {
        match self {
            CollectorError::Io { .. } => "io_error",
            CollectorError::Parse { .. } => "parse_error",
            CollectorError::Unavailable(_) => "unavailable",
            CollectorError::Panicked(_) => "panicked",
        }
    }
}

/// What a collector is asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectRequest {
    pub phase: String,
    pub run_date: NaiveDate,
    pub timestamp: NaiveDateTime,
}

/// What a collector hands back.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub raw: Vec<RawRecord>,
    pub series: SeriesSet,
}

impl Collected {
    pub fn len(&self) -> usize {
        self.raw.len() + self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.series.is_empty()
    }
}

/// A producer of raw readings.
///
/// Implementations must not panic on bad input; a panic is still caught and
/// reported as [`CollectorError::Panicked`].
pub trait Collector: Send + Sync {
    /// Stable identifier; used in logs, debug file names and error records.
    fn name(&self) -> &str;

    fn collect(&self, request: &CollectRequest) -> Result<Collected, CollectorError>;
}

/// Result of running one collector.
#[derive(Debug)]
pub struct CollectorRun {
    pub name: String,
    pub elapsed_ms: u64,
    pub outcome: Result<Collected, CollectorError>,
}

// ─── Parallel collection ─────────────────────────────────────────────

/// Run every collector on a pool of at most `max_workers` threads.
///
/// Output order matches `collectors`. A failing or panicking collector never
/// affects the others.
pub fn collect_all(
    collectors: &[Box<dyn Collector>],
    request: &CollectRequest,
    max_workers: usize,
) -> Vec<CollectorRun> {
    let run_one = |c: &Box<dyn Collector>| run_isolated(c.as_ref(), request);

    if max_workers <= 1 || collectors.len() <= 1 {
        return collectors.iter().map(run_one).collect();
    }
    match rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers.min(collectors.len()))
        .build()
    {
        Ok(pool) => pool.install(|| collectors.par_iter().map(run_one).collect()),
        Err(e) => {
            warn!(error = %e, "could not build collector pool, running sequentially");
            collectors.iter().map(run_one).collect()
        }
    }
}

fn run_isolated(collector: &dyn Collector, request: &CollectRequest) -> CollectorRun {
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| collector.collect(request)))
        .unwrap_or_else(|payload| Err(CollectorError::Panicked(panic_message(payload.as_ref()))));
    let elapsed_ms = start.elapsed().as_millis() as u64;
    debug!(collector = collector.name(), elapsed_ms, ok = outcome.is_ok(), "collector finished");
    CollectorRun {
        name: collector.name().to_string(),
        elapsed_ms,
        outcome,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The synthetic record standing in for a failed collector.
pub fn error_record(name: &str, err: &CollectorError, builder: &RecordBuilder) -> MetricRecord {
    builder
        .make(name.to_uppercase(), "error", None, SYSTEM_SOURCE, Quality::Secondary)
        .with_tag(StatusTag::parse_failed(name, err.reason()))
        .with_comment(err.to_string())
}

// ─── File inbox collector ────────────────────────────────────────────

/// One row of an inbox series file.
#[derive(Debug, Deserialize)]
struct SeriesRow {
    date: NaiveDate,
    asset: String,
    field: String,
    #[serde(default)]
    value: String,
    source: String,
    quality: String,
    #[serde(default)]
    url: String,
}

/// Reads files that external scrapers drop into a directory:
///
/// - `series/*.csv`: `date,asset,field,value,source,quality,url`; rows of one
///   `(asset, field)` form a series ordered by date, provenance from the newest row
/// - `records/*.csv`: ready-made rows in the record table layout
///
/// A missing directory is [`CollectorError::Unavailable`].
#[derive(Debug, Clone)]
pub struct FileCollector {
    name: String,
    dir: PathBuf,
}

impl FileCollector {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_series(&self, path: &Path, acc: &mut SeriesAccumulator) -> Result<(), CollectorError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .map_err(|e| parse_error(path, e))?;
        for (line, row) in rdr.deserialize::<SeriesRow>().enumerate() {
            let row = row.map_err(|e| parse_error(path, e))?;
            let quality = row.quality.parse::<Quality>().map_err(|e| CollectorError::Parse {
                path: path.to_path_buf(),
                message: format!("row {}: {e}", line + 1),
            })?;
            let Ok(value) = row.value.replace(',', "").parse::<f64>() else {
                warn!(path = %path.display(), row = line + 1, asset = %row.asset, field = %row.field, "skipping non-numeric series point");
                continue;
            };
            acc.push(row, value, quality);
        }
        Ok(())
    }

    fn read_records(&self, path: &Path, out: &mut Vec<RawRecord>) -> Result<(), CollectorError> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| parse_error(path, e))?;
        for row in rdr.deserialize::<RawRecord>() {
            out.push(row.map_err(|e| parse_error(path, e))?);
        }
        Ok(())
    }
}

impl Collector for FileCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self, request: &CollectRequest) -> Result<Collected, CollectorError> {
        if !self.dir.is_dir() {
            return Err(CollectorError::Unavailable(format!(
                "inbox {} does not exist",
                self.dir.display()
            )));
        }

        let mut acc = SeriesAccumulator::default();
        for path in csv_files(&self.dir.join("series"))? {
            self.read_series(&path, &mut acc)?;
        }
        let mut raw = Vec::new();
        for path in csv_files(&self.dir.join("records"))? {
            self.read_records(&path, &mut raw)?;
        }

        let series = acc.finish(request.run_date);
        debug!(collector = %self.name, raw = raw.len(), series = series.len(), "inbox read");
        Ok(Collected { raw, series })
    }
}

/// `*.csv` files directly under `dir`, sorted by name. A missing dir is empty.
fn csv_files(dir: &Path) -> Result<Vec<PathBuf>, CollectorError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|source| CollectorError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    Ok(files)
}

fn parse_error(path: &Path, e: csv::Error) -> CollectorError {
    CollectorError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

#[derive(Default)]
struct SeriesAccumulator {
    points: BTreeMap<SeriesId, Vec<(NaiveDate, f64, String, Quality, String)>>,
}

impl SeriesAccumulator {
    fn push(&mut self, row: SeriesRow, value: f64, quality: Quality) {
        self.points
            .entry(SeriesId::new(row.asset, row.field))
            .or_default()
            .push((row.date, value, row.source, quality, row.url));
    }

    /// Build series from points dated on or before `as_of`. A later row for
    /// the same date replaces an earlier one.
    fn finish(self, as_of: NaiveDate) -> SeriesSet {
        let mut set = SeriesSet::new();
        for (id, points) in self.points {
            let mut by_date: BTreeMap<NaiveDate, (f64, String, Quality, String)> = BTreeMap::new();
            for (date, value, source, quality, url) in points {
                if date <= as_of {
                    by_date.insert(date, (value, source, quality, url));
                }
            }
            let Some((_, (_, source, quality, url))) = by_date.last_key_value() else {
                continue;
            };
            let series = Series::new(by_date.values().map(|p| p.0).collect(), source.clone(), *quality)
                .with_url(url.clone());
            set.insert(id, series);
        }
        set
    }
}
