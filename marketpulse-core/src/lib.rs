//! MarketPulse Core — record model, derivation, validation, reconciliation, snapshots.
//!
//! This crate is pure and side-effect free:
//! - Typed metric records with a structured status channel
//! - Derivation of volatility, correlation, basis, returns, spreads and TRIN
//! - Plausibility bounds and required-metric coverage
//! - Reconciliation against the previously persisted batch
//! - One-row-per-date snapshots and the history ledger they are upserted into
//! - Built-in catalogues that configuration can override

pub mod catalog;
pub mod coverage;
pub mod derive;
pub mod ledger;
pub mod range;
pub mod reconcile;
pub mod record;
pub mod snapshot;

pub use coverage::{coverage_ratio, CoverageReport};
pub use derive::{DerivationPlan, DerivationRule, DeriveError, RunContext, Series, SeriesId, SeriesSet};
pub use ledger::{HistoryLedger, UpsertOutcome};
pub use range::{Bounds, RangeCheck, RangeEntry, RangeTable};
pub use reconcile::{AssetClass, AssetClassifier, Reconciled, Reconciler, ThresholdConfig};
pub use record::{
    validate, MetricKey, MetricRecord, Notes, Quality, RawRecord, RecordBuilder, SchemaError,
    SlotKey, StatusTag,
};
pub use snapshot::{
    choose_target_date, BuiltSnapshot, ColumnMap, ColumnSpec, FieldDiagnostic, FieldStatus,
    Snapshot, SnapshotBuilder, SnapshotOptions, SnapshotReport,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the runner hands to worker threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<MetricRecord>();
        require_sync::<MetricRecord>();
        require_send::<SeriesSet>();
        require_sync::<SeriesSet>();
        require_send::<DerivationPlan>();
        require_sync::<DerivationPlan>();
        require_send::<SnapshotBuilder>();
        require_sync::<SnapshotBuilder>();
        require_send::<Reconciler>();
        require_sync::<Reconciler>();
        require_send::<HistoryLedger>();
        require_sync::<HistoryLedger>();
    }

    #[test]
    fn send_sync_compiles() {
        assert_send_sync();
    }
}
