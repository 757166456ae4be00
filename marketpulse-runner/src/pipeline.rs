//! One pipeline run, end to end.
//!
//! collect (parallel, bounded) → schema check → derive → range check →
//! coverage → optional reconcile → persist tables → snapshot + ledger upsert.
//!
//! Everything after collection is single-threaded. A run that fails before
//! the ledger write leaves `history.csv` untouched.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{info, warn};

use marketpulse_core::derive::plan::is_missing_series_gap;
use marketpulse_core::record::TS_FORMAT;
use marketpulse_core::{
    choose_target_date, validate, CoverageReport, FieldStatus, MetricKey, MetricRecord,
    RecordBuilder, RunContext, SeriesSet, UpsertOutcome,
};

use crate::collector::{collect_all, error_record, CollectRequest, Collector, FileCollector};
use crate::config::{ConfigError, PipelineConfig};
use crate::diagnostics::{write_collector_debug, write_history_report, RunEvent, RunLog};
use crate::history::{load_ledger, save_ledger};
use crate::store::{OutputLayout, PersistOutcome, RecordStore, StoreError};

/// Process exit code for a run that completed with enough coverage.
pub const EXIT_OK: i32 = 0;
/// Process exit code for an unhandled failure.
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code for a completed run whose coverage fell below threshold.
pub const EXIT_LOW_COVERAGE: i32 = 2;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ─── Request / outcome ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Schedule slot identifier, e.g. `0730` or `1600`.
    pub phase: String,
    /// Overrides the configured timezone.
    pub timezone: Option<String>,
    /// Compare against the persisted table for the run date first.
    pub reconcile: bool,
    /// Run clock; `None` reads the system clock.
    pub now: Option<DateTime<Utc>>,
}

impl RunRequest {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            timezone: None,
            reconcile: false,
            now: None,
        }
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub fn with_reconcile(mut self, reconcile: bool) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub compared: usize,
    pub revised: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryOutcome {
    pub date: NaiveDate,
    pub outcome: UpsertOutcome,
    pub rows: usize,
    pub missing: usize,
    pub report_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub timestamp: NaiveDateTime,
    pub records: usize,
    pub rejected: usize,
    pub failed_collectors: Vec<String>,
    pub coverage: CoverageReport,
    pub reconcile: Option<ReconcileSummary>,
    pub persist: PersistOutcome,
    pub history: HistoryOutcome,
    pub log_path: PathBuf,
    pub exit_code: i32,
}

// ─── Pipeline ────────────────────────────────────────────────────────

pub struct Pipeline {
    config: PipelineConfig,
    collectors: Vec<Box<dyn Collector>>,
}

impl Pipeline {
    /// A pipeline reading from the file inboxes named in the config.
    pub fn from_config(config: PipelineConfig) -> Self {
        let collectors = config
            .collectors
            .iter()
            .map(|spec| Box::new(FileCollector::new(&spec.name, &spec.dir)) as Box<dyn Collector>)
            .collect();
        Self::with_collectors(config, collectors)
    }

    pub fn with_collectors(config: PipelineConfig, collectors: Vec<Box<dyn Collector>>) -> Self {
        Self { config, collectors }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.config.paths.out_dir)
    }

    fn store(&self) -> RecordStore {
        RecordStore::new(self.layout(), self.config.run.daily_retention)
    }

    /// Execute one run. Failures are recorded in the run log before returning.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome, PipelineError> {
        let tz = match &request.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ConfigError::UnknownTimezone(name.clone()))?,
            None => self.config.timezone()?,
        };
        let now = request.now.unwrap_or_else(Utc::now);
        let timestamp = now.with_timezone(&tz).naive_local();

        let mut log = RunLog::open(&self.layout(), timestamp.date());
        log.push(RunEvent::Started {
            phase: request.phase.clone(),
            ts_kst: timestamp.format(TS_FORMAT).to_string(),
        });
        info!(phase = %request.phase, ts = %timestamp.format(TS_FORMAT), "run started");

        match self.execute(request, timestamp, &mut log) {
            Ok(outcome) => {
                log.flush()?;
                Ok(outcome)
            }
            Err(e) => {
                log.push(RunEvent::Failed {
                    error: e.to_string(),
                });
                if let Err(flush_err) = log.flush() {
                    warn!(error = %flush_err, "could not write run log");
                }
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        request: &RunRequest,
        timestamp: NaiveDateTime,
        log: &mut RunLog,
    ) -> Result<RunOutcome, PipelineError> {
        let config = &self.config;
        let layout = self.layout();
        let builder = RecordBuilder::new(timestamp);
        let run_date = timestamp.date();

        // Collect
        let collect_request = CollectRequest {
            phase: request.phase.clone(),
            run_date,
            timestamp,
        };
        let runs = collect_all(&self.collectors, &collect_request, config.run.max_workers);

        let mut raw = Vec::new();
        let mut series = SeriesSet::new();
        let mut failures: Vec<MetricRecord> = Vec::new();
        let mut failed_collectors = Vec::new();
        for run in runs {
            match run.outcome {
                Ok(collected) => {
                    info!(collector = %run.name, count = collected.len(), elapsed_ms = run.elapsed_ms, "collector ok");
                    log.push(RunEvent::CollectorOk {
                        name: run.name,
                        count: collected.len(),
                        elapsed_ms: run.elapsed_ms,
                    });
                    raw.extend(collected.raw);
                    series.extend(collected.series);
                }
                Err(err) => {
                    warn!(collector = %run.name, error = %err, "collector failed");
                    let debug = match write_collector_debug(&layout, &run.name, &request.phase, &err) {
                        Ok(path) => Some(path.display().to_string()),
                        Err(e) => {
                            warn!(error = %e, "could not write collector debug file");
                            None
                        }
                    };
                    failures.push(error_record(&run.name, &err, &builder));
                    log.push(RunEvent::CollectorError {
                        name: run.name.clone(),
                        error: err.to_string(),
                        debug,
                    });
                    failed_collectors.push(run.name);
                }
            }
        }

        // Schema
        let mut records: Vec<MetricRecord> = Vec::with_capacity(raw.len());
        let mut rejected = 0;
        for row in raw {
            match MetricRecord::try_from_raw(row).and_then(validate) {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    rejected += 1;
                    warn!(error = %e, "rejected collector record");
                }
            }
        }
        if rejected > 0 {
            log.push(RunEvent::SchemaRejected { count: rejected });
        }

        // Derive + validate
        let ctx = RunContext::new(builder, config.is_eod_phase(&request.phase));
        // A reading a collector supplied directly beats a derivation gap for the same metric.
        let supplied: HashSet<MetricKey> = records
            .iter()
            .filter(|r| r.value.is_some())
            .map(MetricRecord::metric_key)
            .collect();
        records.extend(
            config
                .derivation
                .apply(&series, &ctx)
                .into_iter()
                .filter(|r| !(is_missing_series_gap(r) && supplied.contains(&r.metric_key()))),
        );
        records.extend(failures);
        let mut records = config.range_table().apply_all(records);

        // Coverage
        let coverage =
            CoverageReport::compute(&records, &config.required, config.run.coverage_threshold);
        log.push(RunEvent::Coverage {
            value: coverage.ratio,
            threshold: coverage.threshold,
            missing: coverage.missing.iter().map(ToString::to_string).collect(),
        });
        if coverage.is_below_threshold() {
            warn!(
                coverage = coverage.ratio,
                threshold = coverage.threshold,
                missing = coverage.missing.len(),
                "coverage below threshold"
            );
        } else {
            info!(coverage = coverage.ratio, "coverage ok");
        }

        // Reconcile
        let store = self.store();
        let mut reconcile = None;
        if request.reconcile {
            let previous = store.load_daily(run_date)?;
            let previous = (!previous.is_empty()).then_some(previous.as_slice());
            let out = config.reconciler().reconcile(records, previous);
            info!(compared = out.compared, revised = out.revised, "reconciled");
            log.push(RunEvent::Reconcile {
                rows: out.records.len(),
                compared: out.compared,
                revised: out.revised,
            });
            reconcile = Some(ReconcileSummary {
                compared: out.compared,
                revised: out.revised,
            });
            records = out.records;
        }

        // Persist
        let record_count = records.len();
        let persist = store.persist(records)?;
        info!(rows = persist.latest_rows, hash = %persist.content_hash, "tables written");
        log.push(RunEvent::Persisted {
            daily_files: persist
                .daily_files
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            latest_rows: persist.latest_rows,
            blake3: persist.content_hash.clone(),
        });

        // History
        let history = self.upsert_history(None, run_date)?;
        log.push(history_event(&history));

        let exit_code = if coverage.is_below_threshold() {
            EXIT_LOW_COVERAGE
        } else {
            EXIT_OK
        };
        log.push(RunEvent::Completed { exit_code });
        info!(exit_code, "run completed");

        Ok(RunOutcome {
            timestamp,
            records: record_count,
            rejected,
            failed_collectors,
            coverage,
            reconcile,
            persist,
            history,
            log_path: log.path().to_path_buf(),
            exit_code,
        })
    }

    /// Rebuild the ledger row for `date` from its daily table (or, without
    /// one, from `latest.csv`) and write it to `history.csv`. With no date the
    /// best date found in `latest.csv` is used.
    pub fn update_history(&self, date: Option<NaiveDate>) -> Result<HistoryOutcome, PipelineError> {
        let today = Utc::now().with_timezone(&self.config.timezone()?).date_naive();
        let outcome = self.upsert_history(date, today)?;

        let mut log = RunLog::open(&self.layout(), today);
        log.push(history_event(&outcome));
        log.flush()?;
        Ok(outcome)
    }

    fn upsert_history(
        &self,
        date: Option<NaiveDate>,
        fallback: NaiveDate,
    ) -> Result<HistoryOutcome, PipelineError> {
        let layout = self.layout();
        let store = self.store();
        // latest.csv only covers the dates the last run touched.
        let records = match date {
            Some(d) if layout.daily_csv(d).exists() => store.load_daily(d)?,
            _ => store.load_latest()?,
        };
        let target = date.unwrap_or_else(|| choose_target_date(&records, fallback));

        let builder = self.config.snapshot_builder();
        let built = builder.build(&records, target);

        let path = layout.history_csv();
        let mut ledger = load_ledger(
            &path,
            builder.columns(),
            self.config.run.history_retention,
            self.config.run.anchor_time,
        )?;
        let outcome = ledger.upsert(built.snapshot.clone());
        save_ledger(&path, &ledger, builder.columns())?;
        let report_path = write_history_report(&layout, &built.snapshot, &built.report, outcome)?;

        let missing = built.report.count(FieldStatus::Missing);
        info!(date = %target, ?outcome, rows = ledger.len(), missing, "history upserted");
        Ok(HistoryOutcome {
            date: target,
            outcome,
            rows: ledger.len(),
            missing,
            report_path,
        })
    }
}

fn history_event(outcome: &HistoryOutcome) -> RunEvent {
    RunEvent::HistoryUpsert {
        date: outcome.date,
        outcome: outcome.outcome,
        missing: outcome.missing,
    }
}
