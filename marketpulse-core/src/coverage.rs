//! Coverage auditor — fraction of the required metrics present in a batch.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::record::{MetricKey, MetricRecord};

/// `|required ∩ present-non-null| / |required|`. An empty requirement is fully covered.
pub fn coverage_ratio(records: &[MetricRecord], required: &[MetricKey]) -> f64 {
    let required: HashSet<&MetricKey> = required.iter().collect();
    if required.is_empty() {
        return 1.0;
    }
    let present: HashSet<MetricKey> = records
        .iter()
        .filter(|r| r.value.is_some())
        .map(MetricRecord::metric_key)
        .collect();
    let hits = required.iter().filter(|k| present.contains(**k)).count();
    hits as f64 / required.len() as f64
}

/// Coverage ratio plus the keys that were missing, for the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub ratio: f64,
    pub threshold: f64,
    pub missing: Vec<MetricKey>,
}

impl CoverageReport {
    pub fn compute(records: &[MetricRecord], required: &[MetricKey], threshold: f64) -> Self {
        let present: HashSet<MetricKey> = records
            .iter()
            .filter(|r| r.value.is_some())
            .map(MetricRecord::metric_key)
            .collect();
        let missing: BTreeSet<MetricKey> = required
            .iter()
            .filter(|k| !present.contains(*k))
            .cloned()
            .collect();
        Self {
            ratio: coverage_ratio(records, required),
            threshold,
            missing: missing.into_iter().collect(),
        }
    }

    pub fn is_below_threshold(&self) -> bool {
        self.ratio < self.threshold
    }
}
