//! Derivation plan — declarative rules from raw series to records.
//!
//! A collector hands over raw per-asset series ([`SeriesSet`]); each
//! [`DerivationRule`] reads one or more series and emits records. Rules are
//! plain data (serde-tagged) so the catalogue can be overridden from the
//! config file without code changes.
//!
//! Gaps are never silent: a rule whose input series is absent still emits its
//! records, value `None`, tagged `parse_failed:<asset>,missing_series`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::stats::{
    basis, bp_change, breadth_ratio, realized_volatility, rolling_correlation, series_change,
    simple_return, yield_spread,
};
use crate::record::{MetricRecord, Quality, RecordBuilder, StatusTag, EOD_WINDOW};

/// Provenance recorded on synthetic records that have no input series.
pub const SYSTEM_SOURCE: &str = "system";

/// `parse_failed` reason on records whose input series was not collected.
pub const MISSING_SERIES: &str = "missing_series";

/// True for the null placeholder a rule emits when an input series is absent.
pub fn is_missing_series_gap(record: &MetricRecord) -> bool {
    record.value.is_none()
        && record
            .notes
            .parse_failure()
            .is_some_and(|(_, reason)| reason == MISSING_SERIES)
}

// ─── Series ──────────────────────────────────────────────────────────

/// Identifies a raw series as `(asset, field)`. Written `ASSET:field` in config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeriesId {
    pub asset: String,
    pub field: String,
}

impl SeriesId {
    pub fn new(asset: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset, self.field)
    }
}

impl TryFrom<String> for SeriesId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.rsplit_once(':') {
            Some((asset, field)) if !asset.is_empty() && !field.is_empty() => {
                Ok(SeriesId::new(asset, field))
            }
            _ => Err(format!("series id '{s}' must look like ASSET:field")),
        }
    }
}

impl From<SeriesId> for String {
    fn from(id: SeriesId) -> Self {
        id.to_string()
    }
}

/// An ascending, pre-cleaned numeric series with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub values: Vec<f64>,
    pub source: String,
    pub quality: Quality,
    pub url: String,
}

impl Series {
    /// Non-finite points are dropped.
    pub fn new(values: Vec<f64>, source: impl Into<String>, quality: Quality) -> Self {
        Self {
            values: values.into_iter().filter(|v| v.is_finite()).collect(),
            source: source.into(),
            quality,
            url: String::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

/// All raw series gathered for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSet {
    series: BTreeMap<SeriesId, Series>,
}

impl SeriesSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: SeriesId, series: Series) {
        self.series.insert(id, series);
    }

    pub fn get(&self, id: &SeriesId) -> Option<&Series> {
        self.series.get(id)
    }

    /// Merge another set; its series replace same-id entries.
    pub fn extend(&mut self, other: SeriesSet) {
        self.series.extend(other.series);
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &SeriesId> {
        self.series.keys()
    }

    /// An empty series counts as missing.
    fn require(&self, id: &SeriesId) -> Result<&Series, StatusTag> {
        self.series
            .get(id)
            .filter(|s| !s.values.is_empty())
            .ok_or_else(|| StatusTag::parse_failed(id.asset.clone(), MISSING_SERIES))
    }
}

// ─── Run context ─────────────────────────────────────────────────────

/// Per-run facts the rules need: the timestamp stamp and whether the run
/// phase is an end-of-day phase.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub builder: RecordBuilder,
    pub eod: bool,
}

impl RunContext {
    pub fn new(builder: RecordBuilder, eod: bool) -> Self {
        Self { builder, eod }
    }

    fn level_window(&self) -> &'static str {
        if self.eod {
            EOD_WINDOW
        } else {
            "1D"
        }
    }

    /// A record derived from `inputs`: provenance of the first input, the
    /// worst quality among all of them.
    fn derived(&self, asset: &str, key: &str, value: Option<f64>, inputs: &[&Series]) -> MetricRecord {
        let primary = inputs.first();
        let source = primary.map_or(SYSTEM_SOURCE, |s| s.source.as_str());
        let quality = inputs
            .iter()
            .map(|s| s.quality)
            .min()
            .unwrap_or(Quality::Secondary);
        let mut rec = self.builder.make(asset, key, value, source, quality);
        if let Some(s) = primary {
            rec = rec.with_url(s.url.clone());
        }
        rec
    }

    fn gap(&self, asset: &str, key: &str, tag: StatusTag) -> MetricRecord {
        self.builder
            .make(asset, key, None, SYSTEM_SOURCE, Quality::Secondary)
            .with_tag(tag)
    }
}

// ─── Rules ───────────────────────────────────────────────────────────

fn default_basis_window() -> String {
    "spot".into()
}

/// One derivation step. The emitted record's `(asset, key)` are explicit;
/// inputs are referenced by [`SeriesId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DerivationRule {
    /// Latest value plus change vs. the previous point.
    Level {
        asset: String,
        key: String,
        series: SeriesId,
        #[serde(default)]
        unit: String,
        /// Defaults to `EOD` on end-of-day phases, `1D` otherwise.
        #[serde(default)]
        window: Option<String>,
    },
    Return {
        asset: String,
        key: String,
        series: SeriesId,
        periods: usize,
        window: String,
    },
    Volatility {
        asset: String,
        key: String,
        series: SeriesId,
        lookback: usize,
        window: String,
    },
    Correlation {
        asset: String,
        key: String,
        series: SeriesId,
        other: SeriesId,
        lookback: usize,
        window: String,
    },
    Basis {
        asset: String,
        key: String,
        futures: SeriesId,
        spot: SeriesId,
        #[serde(default = "default_basis_window")]
        window: String,
    },
    /// Day-over-day change of a yield series, in basis points.
    BpChange {
        asset: String,
        key: String,
        series: SeriesId,
    },
    Spread {
        asset: String,
        key: String,
        long: SeriesId,
        short: SeriesId,
    },
    /// Advance / decline / unchanged counts plus TRIN.
    Breadth {
        asset: String,
        advances: SeriesId,
        declines: SeriesId,
        unchanged: SeriesId,
        adv_volume: SeriesId,
        dec_volume: SeriesId,
    },
}

impl DerivationRule {
    /// The `(asset, key)` pairs this rule emits.
    pub fn outputs(&self) -> Vec<(&str, &str)> {
        match self {
            DerivationRule::Level { asset, key, .. }
            | DerivationRule::Return { asset, key, .. }
            | DerivationRule::Volatility { asset, key, .. }
            | DerivationRule::Correlation { asset, key, .. }
            | DerivationRule::Basis { asset, key, .. }
            | DerivationRule::BpChange { asset, key, .. }
            | DerivationRule::Spread { asset, key, .. } => vec![(asset.as_str(), key.as_str())],
            DerivationRule::Breadth { asset, .. } => ["advance", "decline", "unchanged", "trin"]
                .into_iter()
                .map(|k| (asset.as_str(), k))
                .collect(),
        }
    }

    pub fn apply(&self, set: &SeriesSet, ctx: &RunContext) -> Vec<MetricRecord> {
        match self {
            DerivationRule::Level {
                asset,
                key,
                series,
                unit,
                window,
            } => {
                let window = window.as_deref().unwrap_or(ctx.level_window());
                let rec = match set.require(series) {
                    Ok(s) => {
                        let (abs, pct) = series_change(&s.values);
                        ctx.derived(asset, key, s.latest(), &[s])
                            .with_changes(abs, pct)
                    }
                    Err(tag) => ctx.gap(asset, key, tag),
                };
                vec![rec.with_unit(unit.clone()).with_window(window)]
            }
            DerivationRule::Return {
                asset,
                key,
                series,
                periods,
                window,
            } => {
                let rec = match set.require(series) {
                    Ok(s) => ctx.derived(asset, key, simple_return(&s.values, *periods), &[s]),
                    Err(tag) => ctx.gap(asset, key, tag),
                };
                vec![rec.with_unit("pct").with_window(window.clone())]
            }
            DerivationRule::Volatility {
                asset,
                key,
                series,
                lookback,
                window,
            } => {
                let rec = match set.require(series) {
                    Ok(s) => {
                        ctx.derived(asset, key, realized_volatility(&s.values, *lookback), &[s])
                    }
                    Err(tag) => ctx.gap(asset, key, tag),
                };
                vec![rec.with_unit("vol").with_window(window.clone())]
            }
            DerivationRule::Correlation {
                asset,
                key,
                series,
                other,
                lookback,
                window,
            } => {
                let rec = match (set.require(series), set.require(other)) {
                    (Ok(a), Ok(b)) => ctx.derived(
                        asset,
                        key,
                        rolling_correlation(&a.values, &b.values, *lookback),
                        &[a, b],
                    ),
                    (Err(tag), _) | (_, Err(tag)) => ctx.gap(asset, key, tag),
                };
                vec![rec.with_unit("corr").with_window(window.clone())]
            }
            DerivationRule::Basis {
                asset,
                key,
                futures,
                spot,
                window,
            } => {
                let rec = match (set.require(futures), set.require(spot)) {
                    (Ok(f), Ok(s)) => match (f.latest(), s.latest()) {
                        (Some(fv), Some(sv)) => match basis(fv, sv) {
                            Ok(b) => ctx.derived(asset, key, Some(b), &[f, s]),
                            Err(_) => ctx.derived(asset, key, None, &[f, s]).with_tag(
                                StatusTag::parse_failed(spot.asset.clone(), "invalid_input"),
                            ),
                        },
                        _ => ctx.derived(asset, key, None, &[f, s]),
                    },
                    (Err(tag), _) | (_, Err(tag)) => ctx.gap(asset, key, tag),
                };
                vec![rec.with_unit("ratio").with_window(window.clone())]
            }
            DerivationRule::BpChange { asset, key, series } => {
                let rec = match set.require(series) {
                    Ok(s) => ctx.derived(asset, key, bp_change(&s.values), &[s]),
                    Err(tag) => ctx.gap(asset, key, tag),
                };
                vec![rec.with_unit("bp").with_window("1D")]
            }
            DerivationRule::Spread {
                asset,
                key,
                long,
                short,
            } => {
                let rec = match (set.require(long), set.require(short)) {
                    (Ok(l), Ok(s)) => {
                        ctx.derived(asset, key, yield_spread(&l.values, &s.values), &[l, s])
                    }
                    (Err(tag), _) | (_, Err(tag)) => ctx.gap(asset, key, tag),
                };
                vec![rec.with_unit("bp").with_window(ctx.level_window())]
            }
            DerivationRule::Breadth {
                asset,
                advances,
                declines,
                unchanged,
                adv_volume,
                dec_volume,
            } => Self::apply_breadth(
                asset,
                [advances, declines, unchanged, adv_volume, dec_volume],
                set,
                ctx,
            ),
        }
    }

    fn apply_breadth(
        asset: &str,
        [adv, dec, unch, adv_vol, dec_vol]: [&SeriesId; 5],
        set: &SeriesSet,
        ctx: &RunContext,
    ) -> Vec<MetricRecord> {
        let window = ctx.level_window();
        let count = |key: &str, id: &SeriesId| match set.require(id) {
            Ok(s) => ctx.derived(asset, key, s.latest(), &[s]),
            Err(tag) => ctx.gap(asset, key, tag),
        };
        let mut out = vec![
            count("advance", adv).with_unit("count"),
            count("decline", dec).with_unit("count"),
            count("unchanged", unch).with_unit("count"),
        ];

        let inputs = [adv, dec, adv_vol, dec_vol].map(|id| set.require(id));
        let trin = match inputs {
            [Ok(a), Ok(d), Ok(av), Ok(dv)] => {
                let value = match (a.latest(), d.latest(), av.latest(), dv.latest()) {
                    (Some(a_), Some(d_), Some(av_), Some(dv_)) => breadth_ratio(a_, d_, av_, dv_),
                    _ => None,
                };
                ctx.derived(asset, "trin", value, &[a, d, av, dv])
            }
            [a, d, av, dv] => {
                let tag = [a, d, av, dv]
                    .into_iter()
                    .find_map(Result::err)
                    .unwrap_or_else(|| StatusTag::parse_failed(asset, MISSING_SERIES));
                ctx.gap(asset, "trin", tag)
            }
        };
        out.push(trin.with_unit("ratio"));
        out.into_iter().map(|r| r.with_window(window)).collect()
    }
}

/// Ordered list of rules applied to each run's series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivationPlan {
    pub rules: Vec<DerivationRule>,
}

impl DerivationPlan {
    pub fn new(rules: Vec<DerivationRule>) -> Self {
        Self { rules }
    }

    pub fn apply(&self, set: &SeriesSet, ctx: &RunContext) -> Vec<MetricRecord> {
        self.rules
            .iter()
            .flat_map(|rule| rule.apply(set, ctx))
            .collect()
    }
}
