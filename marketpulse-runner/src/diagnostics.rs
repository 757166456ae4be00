//! Run diagnostics (JSON): the per-day run event log and debug artifacts.
//!
//! - `logs/runner_YYYYMMDD.json`: JSON array of [`RunEvent`]s; every run of
//!   the day appends to it
//! - `debug/history_upsert_YYYYMMDD.json`: per-column snapshot diagnostics
//! - `debug/<collector>_<phase>.txt`: the error a collector failed with

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use marketpulse_core::{FieldStatus, Snapshot, SnapshotReport, UpsertOutcome};

use crate::store::{write_atomic, OutputLayout, StoreError};

/// One entry of the run event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        phase: String,
        ts_kst: String,
    },
    CollectorOk {
        name: String,
        count: usize,
        elapsed_ms: u64,
    },
    CollectorError {
        name: String,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        debug: Option<String>,
    },
    SchemaRejected {
        count: usize,
    },
    Coverage {
        value: f64,
        threshold: f64,
        missing: Vec<String>,
    },
    Reconcile {
        rows: usize,
        compared: usize,
        revised: usize,
    },
    Persisted {
        daily_files: Vec<String>,
        latest_rows: usize,
        blake3: String,
    },
    HistoryUpsert {
        date: NaiveDate,
        outcome: UpsertOutcome,
        missing: usize,
    },
    Completed {
        exit_code: i32,
    },
    Failed {
        error: String,
    },
}

/// Buffered event log for one run, flushed as a whole.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    /// Entries already on disk from earlier runs of the day, kept verbatim.
    previous: Vec<Value>,
    events: Vec<RunEvent>,
}

impl RunLog {
    /// Open the log for `date`. An unreadable or malformed existing log is
    /// replaced rather than failing the run.
    pub fn open(layout: &OutputLayout, date: NaiveDate) -> Self {
        let path = layout
            .logs_dir()
            .join(format!("runner_{}.json", date.format("%Y%m%d")));
        let previous = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Vec<Value>>(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding malformed run log");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path,
            previous,
            events: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&mut self, event: RunEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        let mut entries = self.previous.clone();
        for event in &self.events {
            entries.push(serde_json::to_value(event).map_err(|e| StoreError::Serialize {
                what: "run log",
                message: e.to_string(),
            })?);
        }
        let bytes = serde_json::to_vec_pretty(&entries).map_err(|e| StoreError::Serialize {
            what: "run log",
            message: e.to_string(),
        })?;
        write_atomic(&self.path, &bytes)
    }
}

// ─── Debug artifacts ─────────────────────────────────────────────────

/// Write `debug/history_upsert_YYYYMMDD.json` and return its path.
pub fn write_history_report(
    layout: &OutputLayout,
    snapshot: &Snapshot,
    report: &SnapshotReport,
    outcome: UpsertOutcome,
) -> Result<PathBuf, StoreError> {
    let mut diagnostics = serde_json::Map::new();
    diagnostics.insert("date".to_string(), json!(report.date));
    diagnostics.insert("time_kst".to_string(), json!(snapshot.time_kst));
    diagnostics.insert("outcome".to_string(), json!(outcome));
    if let Some(reason) = &report.reason {
        diagnostics.insert("reason".to_string(), json!(reason));
    }

    // Count by status
    let mut by_status = serde_json::Map::new();
    for status in [
        FieldStatus::OkEod,
        FieldStatus::OkAny,
        FieldStatus::Missing,
        FieldStatus::NonNumeric,
        FieldStatus::RangeViolation,
    ] {
        by_status.insert(status.to_string(), json!(report.count(status)));
    }
    diagnostics.insert("status_counts".to_string(), Value::Object(by_status));

    diagnostics.insert("src_tag".to_string(), json!(snapshot.src_tag));
    diagnostics.insert("quality".to_string(), json!(snapshot.quality));
    diagnostics.insert("fields".to_string(), json!(report.fields));

    let path = layout
        .debug_dir()
        .join(format!("history_upsert_{}.json", report.date.format("%Y%m%d")));
    let bytes = serde_json::to_vec_pretty(&Value::Object(diagnostics)).map_err(|e| {
        StoreError::Serialize {
            what: "history report",
            message: e.to_string(),
        }
    })?;
    write_atomic(&path, &bytes)?;
    Ok(path)
}

/// Write `debug/<name>_<phase>.txt` holding the collector's error chain.
pub fn write_collector_debug(
    layout: &OutputLayout,
    name: &str,
    phase: &str,
    error: &dyn std::error::Error,
) -> Result<PathBuf, StoreError> {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str("\ncaused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text.push('\n');

    let file = format!("{}_{}.txt", sanitize(name), sanitize(phase));
    let path = layout.debug_dir().join(file);
    write_atomic(&path, text.as_bytes())?;
    Ok(path)
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
