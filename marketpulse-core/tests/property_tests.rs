//! Property tests for the aggregation invariants.
//!
//! Uses proptest to verify:
//! 1. Validation and in-range checks never alter a present value
//! 2. Range application leaves either an in-bounds value or a tagged null
//! 3. Coverage is bounded and monotone in the batch
//! 4. Reconciliation is deterministic and always promotes to final
//! 5. A snapshot's values map back to the records it was built from
//! 6. Ledger upserts keep one row per date, last write wins

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use proptest::prelude::*;

use marketpulse_core::catalog::{default_classifier, default_column_map};
use marketpulse_core::record::parse_timestamp;
use marketpulse_core::{
    coverage_ratio, validate, Bounds, HistoryLedger, MetricKey, MetricRecord, Quality,
    RangeTable, Reconciler, Snapshot, SnapshotBuilder, SnapshotOptions, ThresholdConfig,
};

// ── Strategies (proptest) ────────────────────────────────────────────

const ASSETS: &[&str] = &["KOSPI", "KOSDAQ", "UST10Y", "DXY", "WTI"];
const KEYS: &[&str] = &["idx", "yield", "price"];

fn arb_quality() -> impl Strategy<Value = Quality> {
    prop_oneof![
        Just(Quality::Preliminary),
        Just(Quality::Secondary),
        Just(Quality::Primary),
        Just(Quality::Final),
    ]
}

fn arb_value() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        1 => Just(None),
        4 => (-50.0..5000.0_f64).prop_map(|v| Some((v * 100.0).round() / 100.0)),
    ]
}

fn arb_record() -> impl Strategy<Value = MetricRecord> {
    (
        prop::sample::select(ASSETS),
        prop::sample::select(KEYS),
        arb_value(),
        arb_quality(),
        0u32..24,
        prop::bool::ANY,
    )
        .prop_map(|(asset, key, value, quality, hour, eod)| {
            let ts = parse_timestamp(&format!("2024-03-04 {hour:02}:00")).unwrap();
            MetricRecord::new(ts, asset, key, value, "prop", quality)
                .with_window(if eod { "EOD" } else { "1D" })
        })
}

fn arb_batch() -> impl Strategy<Value = Vec<MetricRecord>> {
    prop::collection::vec(arb_record(), 0..40)
}

fn arb_required() -> impl Strategy<Value = Vec<MetricKey>> {
    prop::collection::vec(
        (prop::sample::select(ASSETS), prop::sample::select(KEYS))
            .prop_map(|(a, k)| MetricKey::new(a, k)),
        0..10,
    )
}

fn table() -> RangeTable {
    RangeTable::new([
        (MetricKey::new("UST10Y", "yield"), Bounds::between(0.0, 20.0)),
        (MetricKey::new("DXY", "idx"), Bounds::between(70.0, 130.0)),
        (MetricKey::new("KOSPI", "idx"), Bounds::at_least(0.0)),
    ])
}

// ── 1. Validation never mutates ──────────────────────────────────────

proptest! {
    /// A well-formed record passes validation untouched.
    #[test]
    fn validate_is_identity_on_valid_records(rec in arb_record()) {
        let out = validate(rec.clone()).unwrap();
        prop_assert_eq!(out, rec);
    }

    /// In-range values pass range application untouched.
    #[test]
    fn in_range_values_are_not_mutated(v in 0.0..20.0_f64) {
        let ts = parse_timestamp("2024-03-04 15:30").unwrap();
        let rec = MetricRecord::new(ts, "UST10Y", "yield", Some(v), "prop", Quality::Primary);
        prop_assert_eq!(table().apply(rec.clone()), rec);
    }
}

// ── 2. Range property ────────────────────────────────────────────────

proptest! {
    /// Out of range becomes a tagged null; nothing is ever clamped.
    #[test]
    fn range_apply_yields_in_bounds_or_tagged_null(rec in arb_record()) {
        let t = table();
        let original = rec.value;
        let out = t.apply(rec.clone());
        match out.value {
            Some(v) => {
                prop_assert_eq!(Some(v), original);
                if let Some(b) = t.get(&out.metric_key()) {
                    prop_assert!(b.contains(v));
                }
            }
            None => {
                prop_assert!(original.is_none() || out.notes.has_range_violation());
            }
        }
    }
}

// ── 3. Coverage ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn coverage_is_a_fraction(batch in arb_batch(), required in arb_required()) {
        let c = coverage_ratio(&batch, &required);
        prop_assert!((0.0..=1.0).contains(&c));
        if required.is_empty() {
            prop_assert_eq!(c, 1.0);
        }
    }

    /// Adding records never lowers coverage.
    #[test]
    fn coverage_is_monotone(batch in arb_batch(), extra in arb_batch(), required in arb_required()) {
        let before = coverage_ratio(&batch, &required);
        let mut grown = batch.clone();
        grown.extend(extra);
        prop_assert!(coverage_ratio(&grown, &required) >= before);
    }
}

// ── 4. Reconciler determinism ────────────────────────────────────────

proptest! {
    #[test]
    fn reconcile_is_deterministic(batch in arb_batch(), previous in arb_batch()) {
        let r = Reconciler::new(ThresholdConfig::default(), default_classifier());
        let a = r.reconcile(batch.clone(), Some(&previous));
        let b = r.reconcile(batch, Some(&previous));
        prop_assert!(a.records.iter().all(|rec| rec.quality == Quality::Final));
        prop_assert!(a.revised <= a.compared);
        prop_assert_eq!(a, b);
    }

    /// Values are never changed by reconciliation, only tags and quality.
    #[test]
    fn reconcile_preserves_values(batch in arb_batch(), previous in arb_batch()) {
        let r = Reconciler::new(ThresholdConfig::default(), default_classifier());
        let out = r.reconcile(batch.clone(), Some(&previous));
        let before: Vec<Option<f64>> = batch.iter().map(|r| r.value).collect();
        let after: Vec<Option<f64>> = out.records.iter().map(|r| r.value).collect();
        prop_assert_eq!(before, after);
    }
}

// ── 5. Snapshot round trip ───────────────────────────────────────────

proptest! {
    /// With one valued EOD record per column, the snapshot reproduces exactly those values.
    #[test]
    fn snapshot_roundtrips_single_records(
        kospi in 1.0..4000.0_f64,
        dxy in 70.0..130.0_f64,
        wti in 10.0..150.0_f64,
    ) {
        let ts = parse_timestamp("2024-03-04 15:30").unwrap();
        let records = vec![
            MetricRecord::new(ts, "KOSPI", "idx", Some(kospi), "krx", Quality::Final).with_window("EOD"),
            MetricRecord::new(ts, "DXY", "idx", Some(dxy), "yahoo", Quality::Final).with_window("EOD"),
            MetricRecord::new(ts, "WTI", "price", Some(wti), "yahoo", Quality::Final).with_window("EOD"),
        ];
        let columns = default_column_map();
        let builder = SnapshotBuilder::new(columns.clone(), table(), SnapshotOptions::default());
        let built = builder.build(&records, ts.date());
        let by_key = built.snapshot.values_by_key(&columns);

        for rec in &records {
            prop_assert_eq!(by_key.get(&rec.metric_key()).copied().flatten(), rec.value);
        }
        prop_assert_eq!(built.snapshot.quality, Some(Quality::Final));
        prop_assert_eq!(built.snapshot.src_tag.as_str(), "krx|yahoo");
    }
}

// ── 6. Ledger upsert ─────────────────────────────────────────────────

fn snapshot_for(day: u32, marker: f64) -> Snapshot {
    let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(day as u64);
    let mut values = BTreeMap::new();
    values.insert("kospi".to_string(), Some(marker));
    Snapshot {
        time_kst: date.and_hms_opt(15, 30, 0).unwrap(),
        values,
        src_tag: String::new(),
        quality: None,
        chosen: BTreeMap::new(),
    }
}

proptest! {
    #[test]
    fn ledger_keeps_last_write_per_date(days in prop::collection::vec(0u32..30, 1..60)) {
        let mut ledger = HistoryLedger::new(0);
        let mut expected: HashMap<NaiveDate, f64> = HashMap::new();
        for (i, d) in days.iter().enumerate() {
            let snap = snapshot_for(*d, i as f64);
            expected.insert(snap.date(), i as f64);
            ledger.upsert(snap);
        }
        prop_assert_eq!(ledger.len(), expected.len());
        for row in ledger.rows() {
            prop_assert_eq!(row.value("kospi"), expected.get(&row.date()).copied());
        }
        let dates: Vec<NaiveDate> = ledger.rows().map(|r| r.date()).collect();
        prop_assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ledger_respects_retention(days in prop::collection::vec(0u32..30, 1..60), retention in 1usize..10) {
        let mut ledger = HistoryLedger::new(retention);
        for d in &days {
            ledger.upsert(snapshot_for(*d, 0.0));
        }
        prop_assert!(ledger.len() <= retention);
    }
}
