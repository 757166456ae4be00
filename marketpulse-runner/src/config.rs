//! Pipeline configuration (`marketpulse.toml`).
//!
//! Every section is optional; omitted sections fall back to the built-in
//! catalogues in `marketpulse_core::catalog`, so an empty file is a valid config.

use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use marketpulse_core::catalog;
use marketpulse_core::{
    AssetClassifier, ColumnMap, ColumnSpec, DerivationPlan, MetricKey, RangeEntry, RangeTable,
    Reconciler, SnapshotBuilder, SnapshotOptions, ThresholdConfig,
};

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "MARKETPULSE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "marketpulse.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ─── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of every output table, log and debug file.
    pub out_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub timezone: String,
    /// Phases whose level readings are end-of-day (`EOD` window).
    pub eod_phases: Vec<String>,
    pub anchor_time: NaiveTime,
    pub coverage_threshold: f64,
    pub max_workers: usize,
    /// Number of `daily/YYYYMMDD.csv` files kept.
    pub daily_retention: usize,
    /// Number of ledger rows kept; 0 keeps everything.
    pub history_retention: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timezone: "Asia/Seoul".into(),
            eod_phases: vec!["1600".into(), "1700".into()],
            anchor_time: SnapshotOptions::default().anchor_time,
            coverage_threshold: 0.8,
            max_workers: 8,
            daily_retention: 180,
            history_retention: 365,
        }
    }
}

/// One file-inbox collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorSpec {
    pub name: String,
    pub dir: PathBuf,
}

// ─── Root config ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub run: RunSettings,
    pub collectors: Vec<CollectorSpec>,
    pub required: Vec<MetricKey>,
    pub ranges: Vec<RangeEntry>,
    pub thresholds: ThresholdConfig,
    pub classifier: AssetClassifier,
    pub columns: Vec<ColumnSpec>,
    pub derivation: DerivationPlan,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            run: RunSettings::default(),
            collectors: vec![CollectorSpec {
                name: "inbox".into(),
                dir: PathBuf::from("inbox"),
            }],
            required: catalog::default_required_keys(),
            ranges: catalog::default_range_entries(),
            thresholds: ThresholdConfig::default(),
            classifier: catalog::default_classifier(),
            columns: catalog::default_columns(),
            derivation: catalog::default_derivation_plan(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `$MARKETPULSE_CONFIG`, else `./marketpulse.toml` if present, else defaults.
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            Self::from_file(local)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;
        let r = &self.run;
        if !(0.0..=1.0).contains(&r.coverage_threshold) {
            return Err(ConfigError::Invalid(format!(
                "coverage_threshold must be within [0, 1], got {}",
                r.coverage_threshold
            )));
        }
        if r.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be >= 1".into()));
        }
        if r.daily_retention == 0 {
            return Err(ConfigError::Invalid("daily_retention must be >= 1".into()));
        }
        for e in &self.ranges {
            if let (Some(lo), Some(hi)) = (e.bounds.lower, e.bounds.upper) {
                if lo > hi {
                    return Err(ConfigError::Invalid(format!(
                        "range for {}:{} has lower {lo} > upper {hi}",
                        e.asset, e.key
                    )));
                }
            }
        }
        let mut names = std::collections::HashSet::new();
        for col in &self.columns {
            if !names.insert(col.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate column '{}'", col.name)));
            }
            if matches!(col.name.as_str(), "time_kst" | "src_tag" | "quality") {
                return Err(ConfigError::Invalid(format!("column name '{}' is reserved", col.name)));
            }
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.run
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.run.timezone.clone()))
    }

    pub fn is_eod_phase(&self, phase: &str) -> bool {
        self.run.eod_phases.iter().any(|p| p == phase)
    }

    pub fn range_table(&self) -> RangeTable {
        RangeTable::from_entries(&self.ranges)
    }

    pub fn column_map(&self) -> ColumnMap {
        ColumnMap::new(self.columns.clone())
    }

    pub fn snapshot_builder(&self) -> SnapshotBuilder {
        SnapshotBuilder::new(
            self.column_map(),
            self.range_table(),
            SnapshotOptions {
                anchor_time: self.run.anchor_time,
            },
        )
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.thresholds, self.classifier.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.run.max_workers, 8);
        assert_eq!(config.run.daily_retention, 180);
        assert_eq!(config.required.len(), 53);
    }

    #[test]
    fn partial_sections_override() {
        let toml = r#"
[paths]
out_dir = "/tmp/mp"

[run]
timezone = "UTC"
coverage_threshold = 0.5
anchor_time = "16:00:00"

[thresholds]
index = 1.5

[[required]]
asset = "KOSPI"
key = "idx"
"#;
        let config = PipelineConfig::from_toml(toml).unwrap();
        assert_eq!(config.paths.out_dir, PathBuf::from("/tmp/mp"));
        assert_eq!(config.run.coverage_threshold, 0.5);
        assert_eq!(config.run.max_workers, 8);
        assert_eq!(config.thresholds.index, 1.5);
        assert_eq!(config.thresholds.fx, 0.05);
        assert_eq!(config.required, vec![MetricKey::new("KOSPI", "idx")]);
        assert_eq!(config.timezone().unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn derivation_rules_parse_from_toml() {
        let toml = r#"
[[derivation]]
type = "LEVEL"
asset = "KOSPI"
key = "idx"
series = "KOSPI:close"

[[derivation]]
type = "CORRELATION"
asset = "BTC"
key = "corr_nq_20d"
series = "BTC:close"
other = "NQ:close"
lookback = 20
window = "20D"
"#;
        let config = PipelineConfig::from_toml(toml).unwrap();
        assert_eq!(config.derivation.rules.len(), 2);
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = PipelineConfig::from_toml("[run]\ntimezone = \"Mars/Olympus\"").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTimezone(_)));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let toml = r#"
[[ranges]]
asset = "DXY"
key = "idx"
lower = 130.0
upper = 70.0
"#;
        assert!(matches!(
            PipelineConfig::from_toml(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn reserved_column_name_is_rejected() {
        let toml = r#"
[[columns]]
name = "quality"
sources = [{ asset = "KOSPI", key = "idx" }]
"#;
        assert!(PipelineConfig::from_toml(toml).is_err());
    }

    #[test]
    fn eod_phase_lookup() {
        let config = PipelineConfig::default();
        assert!(config.is_eod_phase("1700"));
        assert!(!config.is_eod_phase("0730"));
    }
}
