//! Record model — the canonical unit of data interchange.
//!
//! A [`MetricRecord`] is one observation of one metric slot. Records arrive
//! from collectors or CSV tables as loosely-typed [`RawRecord`]s and are
//! promoted to the typed form by [`MetricRecord::try_from_raw`], which is the
//! schema boundary: malformed rows are rejected there, while "value unknown"
//! is a legitimate state carried as `value: None`.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp format used in every persisted table (minute precision).
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Canonical window marker for end-of-day readings.
pub const EOD_WINDOW: &str = "EOD";

/// Column order of the fine-grained record tables (latest / daily).
pub const RECORD_COLUMNS: &[&str] = &[
    "ts_kst",
    "asset",
    "key",
    "value",
    "unit",
    "window",
    "change_abs",
    "change_pct",
    "source",
    "quality",
    "url",
    "notes",
];

// ─── Errors ──────────────────────────────────────────────────────────

/// A record that violates the schema contract. Fatal for that record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid quality tier '{0}' (expected primary, secondary, final or preliminary)")]
    InvalidQuality(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("non-finite value in field '{0}'")]
    NonFiniteValue(&'static str),
}

// ─── Quality tier ────────────────────────────────────────────────────

/// Confidence tier attached to each observation.
///
/// Variants are declared worst-first so the derived `Ord` doubles as the
/// "best quality wins" ranking: `final > primary > secondary > preliminary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Preliminary,
    Secondary,
    Primary,
    Final,
}

impl Quality {
    /// Numeric rank, higher is better.
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Preliminary => "preliminary",
            Quality::Secondary => "secondary",
            Quality::Primary => "primary",
            Quality::Final => "final",
        }
    }
}

impl FromStr for Quality {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preliminary" => Ok(Quality::Preliminary),
            "secondary" => Ok(Quality::Secondary),
            "primary" => Ok(Quality::Primary),
            "final" => Ok(Quality::Final),
            _ => Err(SchemaError::InvalidQuality(s.to_string())),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Identity keys ───────────────────────────────────────────────────

/// `(asset, key)`: a metric irrespective of window. Used by the required-key
/// catalogue, range table and column mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub asset: String,
    pub key: String,
}

impl MetricKey {
    pub fn new(asset: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset, self.key)
    }
}

/// `(asset, key, window)`: the natural identity of a logical metric slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub asset: String,
    pub key: String,
    pub window: String,
}

// ─── Notes: structured status channel ────────────────────────────────

/// Machine-checked status attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusTag {
    /// A value was measured but fell outside its plausibility bounds.
    RangeViolation,
    /// The producer emitted something that is not a number.
    NonNumeric,
    /// The value moved by at least the reconciliation threshold.
    Revised,
    /// A fetch or parse step upstream failed.
    ParseFailed { source: String, reason: String },
}

impl StatusTag {
    pub fn parse_failed(source: impl Into<String>, reason: impl Into<String>) -> Self {
        // `;` separates entries in the persisted form; `,` ends the source.
        let source: String = source.into();
        let reason: String = reason.into();
        StatusTag::ParseFailed {
            source: source.trim().replace([';', ','], "_"),
            reason: reason.trim().replace(';', ","),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "range_violation" => Some(StatusTag::RangeViolation),
            "non_numeric" => Some(StatusTag::NonNumeric),
            "revised" => Some(StatusTag::Revised),
            _ => {
                let rest = s.strip_prefix("parse_failed:")?;
                let (source, reason) = rest.split_once(',').unwrap_or((rest, ""));
                Some(StatusTag::ParseFailed {
                    source: source.trim().to_string(),
                    reason: reason.trim().to_string(),
                })
            }
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusTag::RangeViolation => f.write_str("range_violation"),
            StatusTag::NonNumeric => f.write_str("non_numeric"),
            StatusTag::Revised => f.write_str("revised"),
            StatusTag::ParseFailed { source, reason } => {
                write!(f, "parse_failed:{source},{reason}")
            }
        }
    }
}

/// Status tags plus free-text commentary.
///
/// Persisted as a single `;`-separated cell: tags first, then text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notes {
    tags: Vec<StatusTag>,
    text: String,
}

impl Notes {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            tags: Vec::new(),
            text: text.into(),
        }
    }

    /// Add a tag. Tags are a set: adding an existing tag is a no-op.
    pub fn tag(&mut self, tag: StatusTag) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn tags(&self) -> &[StatusTag] {
        &self.tags
    }

    pub fn comment(&self) -> &str {
        &self.text
    }

    pub fn has(&self, tag: &StatusTag) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_revised(&self) -> bool {
        self.has(&StatusTag::Revised)
    }

    pub fn has_range_violation(&self) -> bool {
        self.has(&StatusTag::RangeViolation)
    }

    pub fn has_non_numeric(&self) -> bool {
        self.has(&StatusTag::NonNumeric)
    }

    /// The first upstream failure, if any, as `(source, reason)`.
    pub fn parse_failure(&self) -> Option<(&str, &str)> {
        self.tags.iter().find_map(|t| match t {
            StatusTag::ParseFailed { source, reason } => Some((source.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.text.is_empty()
    }

    /// Parse the persisted form. Unrecognized entries are kept as text.
    pub fn parse(s: &str) -> Self {
        let mut notes = Notes::default();
        let mut text_parts = Vec::new();
        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            match StatusTag::parse(part) {
                Some(tag) => notes.tag(tag),
                None => text_parts.push(part),
            }
        }
        notes.text = text_parts.join("; ");
        notes
    }
}

impl fmt::Display for Notes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.tags.iter().map(|t| t.to_string()).collect();
        if !self.text.is_empty() {
            parts.push(self.text.clone());
        }
        f.write_str(&parts.join("; "))
    }
}

// ─── Raw (untyped) form ──────────────────────────────────────────────

/// A record as it appears on the wire or in a CSV row: every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub ts_kst: Option<String>,
    pub asset: Option<String>,
    pub key: Option<String>,
    pub value: Option<String>,
    pub unit: Option<String>,
    pub window: Option<String>,
    pub change_abs: Option<String>,
    pub change_pct: Option<String>,
    pub source: Option<String>,
    pub quality: Option<String>,
    pub url: Option<String>,
    pub notes: Option<String>,
}

// ─── Typed record ────────────────────────────────────────────────────

/// One observation of one metric slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub timestamp: NaiveDateTime,
    pub asset: String,
    pub key: String,
    pub value: Option<f64>,
    pub unit: String,
    pub window: String,
    pub change_abs: Option<f64>,
    pub change_pct: Option<f64>,
    pub source: String,
    pub quality: Quality,
    pub url: String,
    pub notes: Notes,
}

impl MetricRecord {
    /// Create a record. Non-finite values are stored as unknown.
    pub fn new(
        timestamp: NaiveDateTime,
        asset: impl Into<String>,
        key: impl Into<String>,
        value: Option<f64>,
        source: impl Into<String>,
        quality: Quality,
    ) -> Self {
        Self {
            timestamp: truncate_to_minute(timestamp),
            asset: asset.into(),
            key: key.into(),
            value: value.filter(|v| v.is_finite()),
            unit: String::new(),
            window: String::new(),
            change_abs: None,
            change_pct: None,
            source: source.into(),
            quality,
            url: String::new(),
            notes: Notes::default(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = window.into();
        self
    }

    pub fn with_changes(mut self, change_abs: Option<f64>, change_pct: Option<f64>) -> Self {
        self.change_abs = change_abs.filter(|v| v.is_finite());
        self.change_pct = change_pct.filter(|v| v.is_finite());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_tag(mut self, tag: StatusTag) -> Self {
        self.notes.tag(tag);
        self
    }

    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        self.notes.text = text.into();
        self
    }

    pub fn metric_key(&self) -> MetricKey {
        MetricKey::new(self.asset.clone(), self.key.clone())
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            asset: self.asset.clone(),
            key: self.key.clone(),
            window: self.window.clone(),
        }
    }

    /// Business date of the observation.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn is_eod(&self) -> bool {
        self.window == EOD_WINDOW
    }

    /// Promote a raw row to a typed record.
    ///
    /// Missing identity/provenance fields and unknown quality tiers are schema
    /// errors. A blank value is "unknown"; a non-numeric value is nulled and
    /// tagged `non_numeric` rather than rejected.
    pub fn try_from_raw(raw: RawRecord) -> Result<Self, SchemaError> {
        let ts = required(raw.ts_kst, "ts_kst")?;
        let timestamp =
            parse_timestamp(&ts).ok_or_else(|| SchemaError::InvalidTimestamp(ts.clone()))?;
        let asset = required(raw.asset, "asset")?;
        let key = required(raw.key, "key")?;
        let source = required(raw.source, "source")?;
        let quality: Quality = required(raw.quality, "quality")?.parse()?;

        let mut notes = Notes::parse(raw.notes.as_deref().unwrap_or(""));
        let value = match parse_number(raw.value.as_deref()) {
            Parsed::Blank => None,
            Parsed::Number(v) => Some(v),
            Parsed::Garbage => {
                notes.tag(StatusTag::NonNumeric);
                None
            }
        };
        let change_abs = parse_number(raw.change_abs.as_deref()).number();
        let change_pct = parse_number(raw.change_pct.as_deref()).number();

        Ok(Self {
            timestamp,
            asset,
            key,
            value,
            unit: raw.unit.unwrap_or_default().trim().to_string(),
            window: raw.window.unwrap_or_default().trim().to_string(),
            change_abs,
            change_pct,
            source,
            quality,
            url: raw.url.unwrap_or_default().trim().to_string(),
            notes,
        })
    }

    /// Flatten to the persisted row shape.
    pub fn to_raw(&self) -> RawRecord {
        let num = |v: Option<f64>| v.map(|x| x.to_string());
        let text = |s: &str| (!s.is_empty()).then(|| s.to_string());
        RawRecord {
            ts_kst: Some(self.timestamp.format(TS_FORMAT).to_string()),
            asset: Some(self.asset.clone()),
            key: Some(self.key.clone()),
            value: num(self.value),
            unit: text(&self.unit),
            window: text(&self.window),
            change_abs: num(self.change_abs),
            change_pct: num(self.change_pct),
            source: Some(self.source.clone()),
            quality: Some(self.quality.to_string()),
            url: text(&self.url),
            notes: text(&self.notes.to_string()),
        }
    }
}

/// Re-check an already-typed record against the schema contract.
///
/// Never mutates the record; a null value is valid.
pub fn validate(record: MetricRecord) -> Result<MetricRecord, SchemaError> {
    if record.asset.trim().is_empty() {
        return Err(SchemaError::MissingField("asset"));
    }
    if record.key.trim().is_empty() {
        return Err(SchemaError::MissingField("key"));
    }
    if record.source.trim().is_empty() {
        return Err(SchemaError::MissingField("source"));
    }
    if record.value.is_some_and(|v| !v.is_finite()) {
        return Err(SchemaError::NonFiniteValue("value"));
    }
    Ok(record)
}

/// Stamps records produced within one run with the run's timestamp.
#[derive(Debug, Clone, Copy)]
pub struct RecordBuilder {
    timestamp: NaiveDateTime,
}

impl RecordBuilder {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp: truncate_to_minute(timestamp),
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn make(
        &self,
        asset: impl Into<String>,
        key: impl Into<String>,
        value: Option<f64>,
        source: impl Into<String>,
        quality: Quality,
    ) -> MetricRecord {
        MetricRecord::new(self.timestamp, asset, key, value, source, quality)
    }
}

// ─── Parsing helpers ─────────────────────────────────────────────────

/// Parse a table timestamp. Accepts minute or second precision; seconds are dropped.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(truncate_to_minute)
}

fn truncate_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

fn required(field: Option<String>, name: &'static str) -> Result<String, SchemaError> {
    match field {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(SchemaError::MissingField(name)),
    }
}

enum Parsed {
    Blank,
    Number(f64),
    Garbage,
}

impl Parsed {
    fn number(self) -> Option<f64> {
        match self {
            Parsed::Number(v) => Some(v),
            _ => None,
        }
    }
}

fn parse_number(s: Option<&str>) -> Parsed {
    let s = match s.map(str::trim) {
        None | Some("") => return Parsed::Blank,
        Some(s) => s,
    };
    if s.eq_ignore_ascii_case("nan") {
        return Parsed::Blank;
    }
    match s.replace(',', "").parse::<f64>() {
        Ok(v) if v.is_finite() => Parsed::Number(v),
        _ => Parsed::Garbage,
    }
}
