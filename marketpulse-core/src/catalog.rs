//! Built-in catalogues: required metrics, plausibility bounds, ledger columns,
//! asset classes and the derivation plan.
//!
//! Everything here is plain data. The config file may replace any of it.

use crate::derive::{DerivationPlan, DerivationRule, SeriesId};
use crate::range::{Bounds, RangeEntry, RangeTable};
use crate::reconcile::{AssetClass, AssetClassifier};
use crate::record::MetricKey;
use crate::snapshot::{ColumnMap, ColumnSpec};

const YIELD_ASSETS: [&str; 5] = ["UST2Y", "UST10Y", "KR3Y", "KR10Y", "TIPS10Y"];
const BRENT_TENORS: [&str; 5] = ["M1", "M2", "M3", "M6", "M12"];

// ─── Required keys ───────────────────────────────────────────────────

/// Metrics whose presence the coverage auditor checks on every run.
pub fn default_required_keys() -> Vec<MetricKey> {
    let mut keys: Vec<MetricKey> = [
        ("KOSPI", "idx"),
        ("KOSDAQ", "idx"),
        ("KOSPI", "advance"),
        ("KOSPI", "decline"),
        ("KOSPI", "unchanged"),
        ("KOSDAQ", "advance"),
        ("KOSDAQ", "decline"),
        ("KOSDAQ", "unchanged"),
        ("KOSPI", "trin"),
        ("KOSPI", "limit_up"),
        ("KOSPI", "limit_down"),
        ("KOSPI", "trading_value"),
        ("KOSPI200", "hv30"),
        ("ES", "price"),
        ("ES", "basis"),
        ("NQ", "price"),
        ("NQ", "basis"),
        ("USD/KRW", "spot"),
        ("USD/KRW", "vol_1d"),
        ("USD/KRW", "vol_5d"),
        ("USD/KRW", "corr_kospi_20d"),
        ("DXY", "idx"),
        ("DXY", "corr_kospi_20d"),
        ("2s10s", "spread"),
        ("Gold", "price"),
        ("WTI", "price"),
        ("Copper", "price"),
        ("BTC", "price"),
        ("BTC", "corr_nq_20d"),
    ]
    .into_iter()
    .map(|(a, k)| MetricKey::new(a, k))
    .collect();

    for asset in ["S&P500", "NDX", "SOX"] {
        for key in ["spot", "return_1w", "return_1m"] {
            keys.push(MetricKey::new(asset, key));
        }
    }
    for asset in YIELD_ASSETS {
        keys.push(MetricKey::new(asset, "yield"));
        keys.push(MetricKey::new(asset, "change_1d_bp"));
    }
    for tenor in BRENT_TENORS {
        keys.push(MetricKey::new("Brent", format!("curve_{tenor}")));
    }
    keys
}

// ─── Range bounds ────────────────────────────────────────────────────

pub fn default_range_entries() -> Vec<RangeEntry> {
    let entry = |asset: &str, key: &str, bounds: Bounds| RangeEntry {
        asset: asset.into(),
        key: key.into(),
        bounds,
    };

    let mut entries: Vec<RangeEntry> = YIELD_ASSETS
        .iter()
        .map(|a| entry(*a, "yield", Bounds::between(0.0, 20.0)))
        .collect();
    entries.push(entry("DXY", "idx", Bounds::between(70.0, 130.0)));
    entries.push(entry("KOSPI", "trin", Bounds::between(0.1, 10.0)));
    entries.push(entry("KOSDAQ", "trin", Bounds::between(0.1, 10.0)));
    for (asset, key) in [
        ("KOSPI", "idx"),
        ("KOSDAQ", "idx"),
        ("S&P500", "spot"),
        ("NDX", "spot"),
        ("SOX", "spot"),
    ] {
        entries.push(entry(asset, key, Bounds::at_least(0.0)));
    }
    entries
}

pub fn default_range_table() -> RangeTable {
    RangeTable::from_entries(&default_range_entries())
}

// ─── Ledger columns ──────────────────────────────────────────────────

/// Wide history columns in output order. Commodity columns also accept `spot` keys.
pub fn default_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("kospi", [("KOSPI", "idx")]),
        ColumnSpec::new("kosdaq", [("KOSDAQ", "idx")]),
        ColumnSpec::new("kospi_adv", [("KOSPI", "advance")]),
        ColumnSpec::new("kospi_dec", [("KOSPI", "decline")]),
        ColumnSpec::new("kospi_unch", [("KOSPI", "unchanged")]),
        ColumnSpec::new("kosdaq_adv", [("KOSDAQ", "advance")]),
        ColumnSpec::new("kosdaq_dec", [("KOSDAQ", "decline")]),
        ColumnSpec::new("kosdaq_unch", [("KOSDAQ", "unchanged")]),
        ColumnSpec::new("usdkrw", [("USD/KRW", "spot")]),
        ColumnSpec::new("dxy", [("DXY", "idx")]),
        ColumnSpec::new("ust2y", [("UST2Y", "yield")]),
        ColumnSpec::new("ust10y", [("UST10Y", "yield")]),
        ColumnSpec::new("kr3y", [("KR3Y", "yield")]),
        ColumnSpec::new("kr10y", [("KR10Y", "yield")]),
        ColumnSpec::new("tips10y", [("TIPS10Y", "yield")]),
        ColumnSpec::new("wti", [("WTI", "price"), ("WTI", "spot")]),
        ColumnSpec::new("brent", [("Brent", "curve_M1"), ("Brent", "spot")]),
        ColumnSpec::new("gold", [("Gold", "price"), ("Gold", "spot")]),
        ColumnSpec::new("copper", [("Copper", "price"), ("Copper", "spot")]),
        ColumnSpec::new("btc", [("BTC", "price"), ("BTC", "spot")]),
        ColumnSpec::new("k200_hv30", [("KOSPI200", "hv30")]),
    ]
}

pub fn default_column_map() -> ColumnMap {
    ColumnMap::new(default_columns())
}

// ─── Asset classes ───────────────────────────────────────────────────

pub fn default_classifier() -> AssetClassifier {
    let mut c = AssetClassifier::default();
    c.slots.insert("USD/KRW:spot".into(), AssetClass::Fx);
    c.slots.insert("2s10s:spread".into(), AssetClass::Spread);

    for key in ["idx", "advance", "decline", "unchanged", "limit_up", "limit_down"] {
        c.keys.insert(key.into(), AssetClass::Index);
    }
    for key in ["yield", "change_1d_bp"] {
        c.keys.insert(key.into(), AssetClass::Yield);
    }
    for key in ["return_1w", "return_1m"] {
        c.keys.insert(key.into(), AssetClass::Return);
    }
    for key in ["hv30", "vol_1d", "vol_5d"] {
        c.keys.insert(key.into(), AssetClass::Volatility);
    }
    for key in ["trin", "corr_kospi_20d", "corr_nq_20d"] {
        c.keys.insert(key.into(), AssetClass::Ratio);
    }
    c.keys.insert("basis".into(), AssetClass::Basis);
    c.keys.insert("spread".into(), AssetClass::Spread);
    c.keys.insert("price".into(), AssetClass::Commodity);
    for tenor in BRENT_TENORS {
        c.keys.insert(format!("curve_{tenor}"), AssetClass::Commodity);
    }
    c.assets.insert("USD/KRW".into(), AssetClass::Fx);
    c
}

// ─── Derivation plan ─────────────────────────────────────────────────

fn sid(asset: &str, field: &str) -> SeriesId {
    SeriesId::new(asset, field)
}

fn level(asset: &str, key: &str, field: &str, unit: &str) -> DerivationRule {
    DerivationRule::Level {
        asset: asset.into(),
        key: key.into(),
        series: sid(asset, field),
        unit: unit.into(),
        window: None,
    }
}

fn correlation(asset: &str, key: &str, other: &str) -> DerivationRule {
    DerivationRule::Correlation {
        asset: asset.into(),
        key: key.into(),
        series: sid(asset, "close"),
        other: sid(other, "close"),
        lookback: 20,
        window: "20D".into(),
    }
}

/// Rules producing every default required metric from raw series.
///
/// Series naming: prices and index levels are `ASSET:close`, yields
/// `ASSET:yield`, breadth inputs `ASSET:advances` etc., Brent tenors `Brent:M1`.
pub fn default_derivation_plan() -> DerivationPlan {
    let mut rules = vec![
        level("KOSPI", "idx", "close", "pt"),
        level("KOSDAQ", "idx", "close", "pt"),
        level("KOSPI", "limit_up", "limit_up", "count"),
        level("KOSPI", "limit_down", "limit_down", "count"),
        level("KOSPI", "trading_value", "trading_value", "KRW"),
    ];

    for market in ["KOSPI", "KOSDAQ"] {
        rules.push(DerivationRule::Breadth {
            asset: market.into(),
            advances: sid(market, "advances"),
            declines: sid(market, "declines"),
            unchanged: sid(market, "unchanged"),
            adv_volume: sid(market, "adv_volume"),
            dec_volume: sid(market, "dec_volume"),
        });
    }

    rules.push(DerivationRule::Volatility {
        asset: "KOSPI200".into(),
        key: "hv30".into(),
        series: sid("KOSPI200", "close"),
        lookback: 30,
        window: "30D".into(),
    });

    for (fut, spot) in [("ES", "S&P500"), ("NQ", "NDX")] {
        rules.push(level(fut, "price", "close", "pt"));
        rules.push(DerivationRule::Basis {
            asset: fut.into(),
            key: "basis".into(),
            futures: sid(fut, "close"),
            spot: sid(spot, "close"),
            window: "spot".into(),
        });
    }

    for index in ["S&P500", "NDX", "SOX"] {
        rules.push(level(index, "spot", "close", "pt"));
        for (key, periods, window) in [("return_1w", 5, "1W"), ("return_1m", 21, "1M")] {
            rules.push(DerivationRule::Return {
                asset: index.into(),
                key: key.into(),
                series: sid(index, "close"),
                periods,
                window: window.into(),
            });
        }
    }

    rules.push(level("USD/KRW", "spot", "close", "KRW"));
    for (key, lookback, window) in [("vol_1d", 1, "1D"), ("vol_5d", 5, "5D")] {
        rules.push(DerivationRule::Volatility {
            asset: "USD/KRW".into(),
            key: key.into(),
            series: sid("USD/KRW", "close"),
            lookback,
            window: window.into(),
        });
    }
    rules.push(correlation("USD/KRW", "corr_kospi_20d", "KOSPI"));
    rules.push(level("DXY", "idx", "close", "idx"));
    rules.push(correlation("DXY", "corr_kospi_20d", "KOSPI"));

    for asset in YIELD_ASSETS {
        rules.push(level(asset, "yield", "yield", "pct"));
        rules.push(DerivationRule::BpChange {
            asset: asset.into(),
            key: "change_1d_bp".into(),
            series: sid(asset, "yield"),
        });
    }
    rules.push(DerivationRule::Spread {
        asset: "2s10s".into(),
        key: "spread".into(),
        long: sid("UST10Y", "yield"),
        short: sid("UST2Y", "yield"),
    });

    rules.push(level("Gold", "price", "close", "USD/oz"));
    rules.push(level("WTI", "price", "close", "USD/bbl"));
    rules.push(level("Copper", "price", "close", "USD/lb"));
    for tenor in BRENT_TENORS {
        rules.push(DerivationRule::Level {
            asset: "Brent".into(),
            key: format!("curve_{tenor}"),
            series: sid("Brent", tenor),
            unit: "USD/bbl".into(),
            window: Some(tenor.into()),
        });
    }

    rules.push(level("BTC", "price", "close", "USD"));
    rules.push(correlation("BTC", "corr_nq_20d", "NQ"));

    DerivationPlan::new(rules)
}
