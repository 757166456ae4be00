//! Reconciler — compare a fresh batch against the previously persisted one.
//!
//! For every slot present in both batches with two known values, a move of at
//! least the asset-class threshold adds the `revised` tag. Every record leaves
//! the reconciler with quality `final`.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::record::{MetricKey, MetricRecord, Quality, SlotKey, StatusTag};

// ─── Asset classes ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Index,
    Fx,
    Yield,
    Spread,
    Ratio,
    Return,
    Volatility,
    Basis,
    Commodity,
    Other,
}

/// Revision thresholds per asset class, in the metric's own unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub index: f64,
    pub fx: f64,
    #[serde(rename = "yield")]
    pub yield_: f64,
    pub spread: f64,
    pub ratio: f64,
    #[serde(rename = "return")]
    pub return_: f64,
    pub volatility: f64,
    pub basis: f64,
    pub commodity: f64,
    pub other: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            index: 0.3,
            fx: 0.05,
            yield_: 1.0,
            spread: 5.0,
            ratio: 0.1,
            return_: 0.01,
            volatility: 0.1,
            basis: 0.05,
            commodity: 0.1,
            other: 0.1,
        }
    }
}

impl ThresholdConfig {
    pub fn get(&self, class: AssetClass) -> f64 {
        match class {
            AssetClass::Index => self.index,
            AssetClass::Fx => self.fx,
            AssetClass::Yield => self.yield_,
            AssetClass::Spread => self.spread,
            AssetClass::Ratio => self.ratio,
            AssetClass::Return => self.return_,
            AssetClass::Volatility => self.volatility,
            AssetClass::Basis => self.basis,
            AssetClass::Commodity => self.commodity,
            AssetClass::Other => self.other,
        }
    }
}

/// Resolves a metric's asset class: exact `ASSET:key` slot first, then key,
/// then asset, else [`AssetClass::Other`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetClassifier {
    pub slots: BTreeMap<String, AssetClass>,
    pub keys: BTreeMap<String, AssetClass>,
    pub assets: BTreeMap<String, AssetClass>,
}

impl AssetClassifier {
    pub fn classify(&self, key: &MetricKey) -> AssetClass {
        self.slots
            .get(&key.to_string())
            .or_else(|| self.keys.get(&key.key))
            .or_else(|| self.assets.get(&key.asset))
            .copied()
            .unwrap_or(AssetClass::Other)
    }
}

// ─── Reconciler ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub records: Vec<MetricRecord>,
    /// Slots with a known value in both batches.
    pub compared: usize,
    pub revised: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    thresholds: ThresholdConfig,
    classifier: AssetClassifier,
}

impl Reconciler {
    pub fn new(thresholds: ThresholdConfig, classifier: AssetClassifier) -> Self {
        Self {
            thresholds,
            classifier,
        }
    }

    pub fn threshold_for(&self, key: &MetricKey) -> f64 {
        self.thresholds.get(self.classifier.classify(key))
    }

    pub fn reconcile(
        &self,
        batch: Vec<MetricRecord>,
        previous: Option<&[MetricRecord]>,
    ) -> Reconciled {
        let index = previous.map(index_latest).unwrap_or_default();
        let mut compared = 0;
        let mut revised = 0;

        let records = batch
            .into_iter()
            .map(|mut rec| {
                rec.quality = Quality::Final;
                let old = index.get(&rec.slot_key()).and_then(|r| r.value);
                if let (Some(new), Some(old)) = (rec.value, old) {
                    compared += 1;
                    if (new - old).abs() >= self.threshold_for(&rec.metric_key()) {
                        revised += 1;
                        rec.notes.tag(StatusTag::Revised);
                    }
                }
                rec
            })
            .collect();

        Reconciled {
            records,
            compared,
            revised,
        }
    }
}

/// Index a batch by slot; within it the latest timestamp wins, later rows on ties.
fn index_latest(records: &[MetricRecord]) -> HashMap<SlotKey, &MetricRecord> {
    let mut index: HashMap<SlotKey, &MetricRecord> = HashMap::new();
    for rec in records {
        index
            .entry(rec.slot_key())
            .and_modify(|cur| {
                if rec.timestamp >= cur.timestamp {
                    *cur = rec;
                }
            })
            .or_insert(rec);
    }
    index
}
