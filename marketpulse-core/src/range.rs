//! Range validator — per-metric plausibility bounds.
//!
//! Out-of-range values are nulled and tagged `range_violation`, never clamped
//! and never raised as errors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::record::{MetricKey, MetricRecord, StatusTag};

/// Inclusive bounds; `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
}

impl Bounds {
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { lower, upper }
    }

    pub fn between(lower: f64, upper: f64) -> Self {
        Self::new(Some(lower), Some(upper))
    }

    pub fn at_least(lower: f64) -> Self {
        Self::new(Some(lower), None)
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower.map_or(true, |lo| value >= lo) && self.upper.map_or(true, |hi| value <= hi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeCheck {
    /// The value is within bounds, or no bounds are configured.
    InRange,
    /// No value to check.
    Null,
    OutOfRange(Bounds),
}

/// A single bounds entry as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub asset: String,
    pub key: String,
    #[serde(flatten)]
    pub bounds: Bounds,
}

/// Immutable `(asset, key) → bounds` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeTable {
    bounds: HashMap<MetricKey, Bounds>,
}

impl RangeTable {
    pub fn new(entries: impl IntoIterator<Item = (MetricKey, Bounds)>) -> Self {
        Self {
            bounds: entries.into_iter().collect(),
        }
    }

    pub fn from_entries(entries: &[RangeEntry]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|e| (MetricKey::new(e.asset.clone(), e.key.clone()), e.bounds)),
        )
    }

    pub fn get(&self, key: &MetricKey) -> Option<&Bounds> {
        self.bounds.get(key)
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn check(&self, key: &MetricKey, value: Option<f64>) -> RangeCheck {
        let Some(v) = value else {
            return RangeCheck::Null;
        };
        match self.bounds.get(key) {
            Some(b) if !b.contains(v) => RangeCheck::OutOfRange(*b),
            _ => RangeCheck::InRange,
        }
    }

    /// Null and tag an out-of-range record; return it unchanged otherwise.
    pub fn apply(&self, mut record: MetricRecord) -> MetricRecord {
        if let RangeCheck::OutOfRange(_) = self.check(&record.metric_key(), record.value) {
            record.value = None;
            record.notes.tag(StatusTag::RangeViolation);
        }
        record
    }

    pub fn apply_all(&self, records: Vec<MetricRecord>) -> Vec<MetricRecord> {
        records.into_iter().map(|r| self.apply(r)).collect()
    }
}
