//! Criterion benchmarks for the derivation hot paths.
//!
//! Benchmarks:
//! 1. Realized volatility over growing windows
//! 2. Rolling correlation
//! 3. Full default derivation plan over a populated series set
//! 4. Snapshot build from the derived batch

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chrono::NaiveDate;
use marketpulse_core::catalog::{default_column_map, default_derivation_plan, default_range_table};
use marketpulse_core::derive::stats::{realized_volatility, rolling_correlation};
use marketpulse_core::record::parse_timestamp;
use marketpulse_core::{
    Quality, RecordBuilder, RunContext, Series, SeriesId, SeriesSet, SnapshotBuilder,
    SnapshotOptions,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_prices(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 100.0 + (i as f64 * 0.1).sin() * 10.0 + i as f64 * 0.01)
        .collect()
}

fn make_series_set(n: usize) -> SeriesSet {
    let mut set = SeriesSet::new();
    let prices = make_prices(n);
    for asset in [
        "KOSPI", "KOSDAQ", "KOSPI200", "ES", "NQ", "S&P500", "NDX", "SOX", "USD/KRW", "DXY",
        "Gold", "WTI", "Copper", "BTC",
    ] {
        set.insert(
            SeriesId::new(asset, "close"),
            Series::new(prices.clone(), "bench", Quality::Secondary),
        );
    }
    for asset in ["UST2Y", "UST10Y", "KR3Y", "KR10Y", "TIPS10Y"] {
        set.insert(
            SeriesId::new(asset, "yield"),
            Series::new(vec![4.0, 4.05], "bench", Quality::Secondary),
        );
    }
    set
}

fn ctx() -> RunContext {
    let ts = parse_timestamp("2024-03-04 16:00").unwrap_or_default();
    RunContext::new(RecordBuilder::new(ts), true)
}

// ── Benches ──────────────────────────────────────────────────────────

fn bench_volatility(c: &mut Criterion) {
    let prices = make_prices(5_000);
    let mut group = c.benchmark_group("realized_volatility");
    for window in [5usize, 30, 252, 2_520] {
        group.bench_with_input(BenchmarkId::from_parameter(window), &window, |b, &w| {
            b.iter(|| realized_volatility(black_box(&prices), w))
        });
    }
    group.finish();
}

fn bench_correlation(c: &mut Criterion) {
    let a = make_prices(5_000);
    let b: Vec<f64> = a.iter().map(|x| x.ln()).collect();
    c.bench_function("rolling_correlation_20", |bench| {
        bench.iter(|| rolling_correlation(black_box(&a), black_box(&b), 20))
    });
}

fn bench_plan(c: &mut Criterion) {
    let plan = default_derivation_plan();
    let set = make_series_set(260);
    let ctx = ctx();
    c.bench_function("default_plan_apply", |b| {
        b.iter(|| plan.apply(black_box(&set), &ctx))
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let records = default_derivation_plan().apply(&make_series_set(260), &ctx());
    let builder = SnapshotBuilder::new(
        default_column_map(),
        default_range_table(),
        SnapshotOptions::default(),
    );
    let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap_or_default();
    c.bench_function("snapshot_build", |b| {
        b.iter(|| builder.build(black_box(&records), date))
    });
}

criterion_group!(benches, bench_volatility, bench_correlation, bench_plan, bench_snapshot);
criterion_main!(benches);
