//! Snapshot builder — collapse a batch of records into one wide row per date.
//!
//! Each configured column pulls from one or more `(asset, key)` sources.
//! Selection per column:
//! 1. records for the target date with window `EOD` (status `ok_eod`);
//! 2. otherwise any record for that date (status `ok_any`);
//! 3. among candidates, valued records beat null ones, then higher quality,
//!    then later timestamp, then later position in the batch.
//!
//! The chosen value is re-checked against the range table. Columns that end
//! up empty report why (`missing`, `non_numeric`, `range_violation`).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::range::{RangeCheck, RangeTable};
use crate::record::{MetricKey, MetricRecord, Quality};

// ─── Column mapping ──────────────────────────────────────────────────

/// One wide-table column and the metrics that may fill it, in preference order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sources: Vec<MetricKey>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sources: impl IntoIterator<Item = (&'static str, &'static str)>) -> Self {
        Self {
            name: name.into(),
            sources: sources
                .into_iter()
                .map(|(a, k)| MetricKey::new(a, k))
                .collect(),
        }
    }
}

/// Ordered columns plus a `MetricKey → column index` lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    columns: Vec<ColumnSpec>,
    lookup: HashMap<MetricKey, usize>,
}

impl ColumnMap {
    /// A source listed under several columns belongs to the first one.
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        let mut lookup = HashMap::new();
        for (idx, col) in columns.iter().enumerate() {
            for src in &col.sources {
                lookup.entry(src.clone()).or_insert(idx);
            }
        }
        Self { columns, lookup }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_for(&self, key: &MetricKey) -> Option<usize> {
        self.lookup.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub time_kst: NaiveDateTime,
    pub values: BTreeMap<String, Option<f64>>,
    pub src_tag: String,
    pub quality: Option<Quality>,
    /// Source key that filled each valued column. Not persisted in `history.csv`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub chosen: BTreeMap<String, MetricKey>,
}

impl Snapshot {
    /// A row with every configured column blank.
    pub fn empty(time_kst: NaiveDateTime, columns: &ColumnMap) -> Self {
        Self {
            time_kst,
            values: columns.names().map(|n| (n.to_string(), None)).collect(),
            src_tag: String::new(),
            quality: None,
            chosen: BTreeMap::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.time_kst.date()
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }

    /// Re-derive `(asset, key) → value`: the source that filled each column,
    /// or the column's first source when none is recorded.
    pub fn values_by_key(&self, columns: &ColumnMap) -> HashMap<MetricKey, Option<f64>> {
        columns
            .columns()
            .iter()
            .filter_map(|col| {
                let key = self.chosen.get(&col.name).or_else(|| col.sources.first())?.clone();
                Some((key, self.value(&col.name)))
            })
            .collect()
    }
}

// ─── Diagnostics ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    OkEod,
    OkAny,
    Missing,
    NonNumeric,
    RangeViolation,
}

impl FieldStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, FieldStatus::OkEod | FieldStatus::OkAny)
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldStatus::OkEod => "ok_eod",
            FieldStatus::OkAny => "ok_any",
            FieldStatus::Missing => "missing",
            FieldStatus::NonNumeric => "non_numeric",
            FieldStatus::RangeViolation => "range_violation",
        };
        f.write_str(s)
    }
}

/// How one column was filled (or why it was not).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiagnostic {
    pub column: String,
    pub status: FieldStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen: Option<MetricKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<f64>,
    pub candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub date: NaiveDate,
    pub reason: Option<String>,
    pub fields: Vec<FieldDiagnostic>,
}

impl SnapshotReport {
    pub fn status_of(&self, column: &str) -> Option<FieldStatus> {
        self.fields
            .iter()
            .find(|f| f.column == column)
            .map(|f| f.status)
    }

    pub fn count(&self, status: FieldStatus) -> usize {
        self.fields.iter().filter(|f| f.status == status).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltSnapshot {
    pub snapshot: Snapshot,
    pub report: SnapshotReport,
}

// ─── Builder ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotOptions {
    /// Wall-clock anchor written into `time_kst`.
    pub anchor_time: NaiveTime,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            anchor_time: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

pub const NO_DATA_REASON: &str = "no data available";

#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    columns: ColumnMap,
    ranges: RangeTable,
    options: SnapshotOptions,
}

impl SnapshotBuilder {
    pub fn new(columns: ColumnMap, ranges: RangeTable, options: SnapshotOptions) -> Self {
        Self {
            columns,
            ranges,
            options,
        }
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn build(&self, records: &[MetricRecord], target_date: NaiveDate) -> BuiltSnapshot {
        let time_kst = target_date.and_time(self.options.anchor_time);
        let mut snapshot = Snapshot::empty(time_kst, &self.columns);

        if records.is_empty() {
            let fields = self
                .columns
                .names()
                .map(|name| FieldDiagnostic::missing(name, 0))
                .collect();
            return BuiltSnapshot {
                snapshot,
                report: SnapshotReport {
                    date: target_date,
                    reason: Some(NO_DATA_REASON.into()),
                    fields,
                },
            };
        }

        let mut by_column: Vec<Vec<&MetricRecord>> = vec![Vec::new(); self.columns.len()];
        for rec in records.iter().filter(|r| r.date() == target_date) {
            if let Some(idx) = self.columns.column_for(&rec.metric_key()) {
                by_column[idx].push(rec);
            }
        }

        let mut sources = BTreeSet::new();
        let mut qualities = Vec::new();
        let mut fields = Vec::with_capacity(self.columns.len());

        for (col, candidates) in self.columns.columns().iter().zip(&by_column) {
            let eod: Vec<&MetricRecord> = candidates.iter().copied().filter(|r| r.is_eod()).collect();
            let (pool, ok_status) = if eod.is_empty() {
                (candidates.as_slice(), FieldStatus::OkAny)
            } else {
                (eod.as_slice(), FieldStatus::OkEod)
            };

            let Some(chosen) = pick(pool) else {
                fields.push(FieldDiagnostic::missing(&col.name, 0));
                continue;
            };

            let status = match chosen.value {
                Some(v) => match self.ranges.check(&chosen.metric_key(), Some(v)) {
                    RangeCheck::OutOfRange(_) => FieldStatus::RangeViolation,
                    _ => ok_status,
                },
                None if chosen.notes.has_non_numeric() => FieldStatus::NonNumeric,
                None if chosen.notes.has_range_violation() => FieldStatus::RangeViolation,
                None => FieldStatus::Missing,
            };

            if status.is_ok() {
                snapshot.values.insert(col.name.clone(), chosen.value);
                snapshot.chosen.insert(col.name.clone(), chosen.metric_key());
                let tag = chosen.source.split('|').next().unwrap_or("").trim().to_lowercase();
                if !tag.is_empty() {
                    sources.insert(tag);
                }
                qualities.push(chosen.quality);
            }

            fields.push(FieldDiagnostic {
                column: col.name.clone(),
                status,
                chosen: Some(chosen.metric_key()),
                source: Some(chosen.source.clone()),
                timestamp: Some(chosen.timestamp),
                raw: chosen.value,
                candidates: candidates.len(),
            });
        }

        snapshot.src_tag = sources.into_iter().collect::<Vec<_>>().join("|");
        snapshot.quality = aggregate_quality(&qualities);

        BuiltSnapshot {
            snapshot,
            report: SnapshotReport {
                date: target_date,
                reason: None,
                fields,
            },
        }
    }
}

impl FieldDiagnostic {
    fn missing(column: &str, candidates: usize) -> Self {
        Self {
            column: column.to_string(),
            status: FieldStatus::Missing,
            chosen: None,
            source: None,
            timestamp: None,
            raw: None,
            candidates,
        }
    }
}

/// Valued first, then quality, then timestamp. `max_by` keeps the last of equals.
fn pick<'a>(pool: &[&'a MetricRecord]) -> Option<&'a MetricRecord> {
    pool.iter()
        .copied()
        .max_by(|a, b| {
            (a.value.is_some(), a.quality, a.timestamp).cmp(&(b.value.is_some(), b.quality, b.timestamp))
        })
}

/// `final` when every contributor is final, `secondary` otherwise, `None` without contributors.
fn aggregate_quality(qualities: &[Quality]) -> Option<Quality> {
    if qualities.is_empty() {
        None
    } else if qualities.iter().all(|q| *q == Quality::Final) {
        Some(Quality::Final)
    } else {
        Some(Quality::Secondary)
    }
}

/// Business date to snapshot: newest `EOD` date, else newest date of any
/// record, else `fallback`.
pub fn choose_target_date(records: &[MetricRecord], fallback: NaiveDate) -> NaiveDate {
    records
        .iter()
        .filter(|r| r.is_eod())
        .map(MetricRecord::date)
        .max()
        .or_else(|| records.iter().map(MetricRecord::date).max())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::Bounds;
    use crate::record::{parse_timestamp, StatusTag};

    fn columns() -> ColumnMap {
        ColumnMap::new(vec![
            ColumnSpec::new("kospi", [("KOSPI", "idx")]),
            ColumnSpec::new("ust10y", [("UST10Y", "yield")]),
            ColumnSpec::new("wti", [("WTI", "price"), ("WTI", "spot")]),
        ])
    }

    fn builder() -> SnapshotBuilder {
        let ranges = RangeTable::new([(MetricKey::new("UST10Y", "yield"), Bounds::between(0.0, 10.0))]);
        SnapshotBuilder::new(columns(), ranges, SnapshotOptions::default())
    }

    fn rec(asset: &str, key: &str, value: Option<f64>, ts: &str, window: &str, q: Quality) -> MetricRecord {
        MetricRecord::new(parse_timestamp(ts).unwrap(), asset, key, value, "krx|api", q).with_window(window)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[test]
    fn empty_batch_gives_placeholder_row() {
        let built = builder().build(&[], day());
        assert_eq!(built.snapshot.time_kst.to_string(), "2024-01-02 15:30:00");
        assert!(built.snapshot.values.values().all(Option::is_none));
        assert_eq!(built.snapshot.values.len(), 3);
        assert_eq!(built.report.count(FieldStatus::Missing), 3);
        assert_eq!(built.report.reason.as_deref(), Some(NO_DATA_REASON));
        assert_eq!(built.snapshot.quality, None);
    }

    #[test]
    fn eod_record_beats_later_intraday() {
        let records = vec![
            rec("KOSPI", "idx", Some(2600.0), "2024-01-02 15:30", "EOD", Quality::Secondary),
            rec("KOSPI", "idx", Some(2610.0), "2024-01-02 16:40", "1D", Quality::Final),
        ];
        let built = builder().build(&records, day());
        assert_eq!(built.snapshot.value("kospi"), Some(2600.0));
        assert_eq!(built.report.status_of("kospi"), Some(FieldStatus::OkEod));
    }

    #[test]
    fn falls_back_to_any_window() {
        let records = vec![rec("KOSPI", "idx", Some(2610.0), "2024-01-02 08:00", "1D", Quality::Final)];
        let built = builder().build(&records, day());
        assert_eq!(built.snapshot.value("kospi"), Some(2610.0));
        assert_eq!(built.report.status_of("kospi"), Some(FieldStatus::OkAny));
    }

    #[test]
    fn tie_break_prefers_value_then_quality_then_time() {
        let records = vec![
            rec("KOSPI", "idx", Some(1.0), "2024-01-02 15:30", "EOD", Quality::Final),
            rec("KOSPI", "idx", Some(2.0), "2024-01-02 16:00", "EOD", Quality::Primary),
            rec("KOSPI", "idx", None, "2024-01-02 17:00", "EOD", Quality::Final),
            rec("KOSPI", "idx", Some(3.0), "2024-01-02 15:00", "EOD", Quality::Final),
        ];
        let built = builder().build(&records, day());
        assert_eq!(built.snapshot.value("kospi"), Some(1.0));
    }

    #[test]
    fn out_of_range_choice_reports_violation() {
        let records = vec![rec("UST10Y", "yield", Some(12.0), "2024-01-02 15:30", "EOD", Quality::Final)];
        let built = builder().build(&records, day());
        assert_eq!(built.snapshot.value("ust10y"), None);
        assert_eq!(built.report.status_of("ust10y"), Some(FieldStatus::RangeViolation));
    }

    #[test]
    fn tagged_null_reports_its_reason() {
        let records = vec![
            rec("KOSPI", "idx", None, "2024-01-02 15:30", "EOD", Quality::Final).with_tag(StatusTag::NonNumeric),
            rec("UST10Y", "yield", None, "2024-01-02 15:30", "EOD", Quality::Final)
                .with_tag(StatusTag::RangeViolation),
        ];
        let built = builder().build(&records, day());
        assert_eq!(built.report.status_of("kospi"), Some(FieldStatus::NonNumeric));
        assert_eq!(built.report.status_of("ust10y"), Some(FieldStatus::RangeViolation));
        assert_eq!(built.report.status_of("wti"), Some(FieldStatus::Missing));
    }

    #[test]
    fn alternate_source_fills_column() {
        let records = vec![rec("WTI", "spot", Some(78.2), "2024-01-02 15:30", "EOD", Quality::Final)];
        let built = builder().build(&records, day());
        assert_eq!(built.snapshot.value("wti"), Some(78.2));
    }

    #[test]
    fn src_tag_and_quality_aggregate() {
        let mut a = rec("KOSPI", "idx", Some(2600.0), "2024-01-02 15:30", "EOD", Quality::Final);
        a.source = "KRX|fallback".into();
        let mut b = rec("WTI", "price", Some(78.0), "2024-01-02 15:30", "EOD", Quality::Final);
        b.source = "Yahoo".into();
        let c = rec("UST10Y", "yield", Some(4.1), "2024-01-02 15:30", "EOD", Quality::Final);

        let built = builder().build(&[a.clone(), b.clone(), c], day());
        assert_eq!(built.snapshot.src_tag, "krx|yahoo");
        assert_eq!(built.snapshot.quality, Some(Quality::Final));

        b.quality = Quality::Primary;
        let built = builder().build(&[a, b], day());
        assert_eq!(built.snapshot.quality, Some(Quality::Secondary));
    }

    #[test]
    fn other_dates_are_ignored() {
        let records = vec![rec("KOSPI", "idx", Some(2600.0), "2024-01-01 15:30", "EOD", Quality::Final)];
        let built = builder().build(&records, day());
        assert_eq!(built.snapshot.value("kospi"), None);
        assert_eq!(built.report.reason, None);
    }

    #[test]
    fn target_date_prefers_eod() {
        let records = vec![
            rec("KOSPI", "idx", Some(1.0), "2024-01-02 15:30", "EOD", Quality::Final),
            rec("KOSPI", "idx", Some(1.0), "2024-01-03 08:00", "1D", Quality::Final),
        ];
        let fallback = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(choose_target_date(&records, fallback), day());
        assert_eq!(
            choose_target_date(&records[1..], fallback),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
        );
        assert_eq!(choose_target_date(&[], fallback), fallback);
    }

    #[test]
    fn values_by_key_follows_the_filling_source() {
        let records = vec![rec("WTI", "spot", Some(78.2), "2024-01-02 15:30", "EOD", Quality::Final)];
        let built = builder().build(&records, day());
        let by_key = built.snapshot.values_by_key(&columns());
        assert_eq!(by_key[&MetricKey::new("WTI", "spot")], Some(78.2));
        assert!(!by_key.contains_key(&MetricKey::new("WTI", "price")));
        assert_eq!(by_key[&MetricKey::new("KOSPI", "idx")], None);
    }

    #[test]
    fn values_by_key_without_recorded_source_uses_first() {
        let mut snap = Snapshot::empty(day().and_time(NaiveTime::MIN), &columns());
        snap.values.insert("wti".into(), Some(78.2));
        let by_key = snap.values_by_key(&columns());
        assert_eq!(by_key[&MetricKey::new("WTI", "price")], Some(78.2));
    }
}
