//! MarketPulse Runner — everything with side effects around the pure core.
//!
//! This crate builds on `marketpulse-core` to provide:
//! - TOML configuration with built-in catalogue defaults
//! - Collectors: the trait, a bounded parallel runner, the file inbox collector
//! - Record tables (`latest.csv`, `daily/`) and the `history.csv` ledger file
//! - Run event log and debug diagnostics
//! - The end-to-end pipeline and JSON export

pub mod collector;
pub mod config;
pub mod diagnostics;
pub mod export;
pub mod history;
pub mod pipeline;
pub mod store;

pub use collector::{
    collect_all, error_record, CollectRequest, Collected, Collector, CollectorError, CollectorRun,
    FileCollector,
};
pub use config::{CollectorSpec, ConfigError, PathsConfig, PipelineConfig, RunSettings};
pub use diagnostics::{RunEvent, RunLog};
pub use export::{csv_to_json, export_json, ExportSummary};
pub use history::{load_ledger, save_ledger};
pub use pipeline::{
    HistoryOutcome, Pipeline, PipelineError, ReconcileSummary, RunOutcome, RunRequest, EXIT_FAILURE,
    EXIT_LOW_COVERAGE, EXIT_OK,
};
pub use store::{OutputLayout, PersistOutcome, RecordStore, StoreError};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_is_send_sync() {
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
    }

    #[test]
    fn collector_types_are_send_sync() {
        assert_send::<FileCollector>();
        assert_sync::<FileCollector>();
        assert_send::<Box<dyn Collector>>();
        assert_sync::<Box<dyn Collector>>();
        assert_send::<CollectorError>();
    }

    #[test]
    fn pipeline_is_send_sync() {
        assert_send::<Pipeline>();
        assert_sync::<Pipeline>();
    }

    #[test]
    fn store_types_are_send_sync() {
        assert_send::<RecordStore>();
        assert_sync::<RecordStore>();
        assert_send::<StoreError>();
        assert_sync::<StoreError>();
    }
}
