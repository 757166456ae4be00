//! Pure derivation functions.
//!
//! Inputs are ascending, pre-cleaned series. "Not enough data" is `None`,
//! never an error; the only caller-visible error is [`basis`] on a zero spot,
//! which indicates a configuration or data bug rather than a transient gap.

use thiserror::Error;

/// Annualization factor for daily returns.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeriveError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Annualized realized volatility of the trailing `window` log returns.
///
/// Uses population standard deviation (divide by N), scaled by √252.
/// Needs `window + 1` prices, all strictly positive.
pub fn realized_volatility(prices: &[f64], window: usize) -> Option<f64> {
    if window == 0 || prices.len() < window + 1 {
        return None;
    }
    let tail = &prices[prices.len() - window - 1..];
    if tail.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return None;
    }
    let returns: Vec<f64> = tail.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let sd = population_stdev(&returns);
    let vol = sd * TRADING_DAYS_PER_YEAR.sqrt();
    vol.is_finite().then_some(vol)
}

/// Pearson correlation over the trailing `window` pairs.
///
/// Both series are tail-aligned to the shorter length first.
pub fn rolling_correlation(a: &[f64], b: &[f64], window: usize) -> Option<f64> {
    let n = a.len().min(b.len());
    if window < 2 || n < window {
        return None;
    }
    let xs = &a[a.len() - window..];
    let ys = &b[b.len() - window..];

    let mean_x = mean(xs);
    let mean_y = mean(ys);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    let corr = cov / (var_x.sqrt() * var_y.sqrt());
    corr.is_finite().then_some(corr.clamp(-1.0, 1.0))
}

/// Relative basis `(futures - spot) / spot`.
pub fn basis(futures: f64, spot: f64) -> Result<f64, DeriveError> {
    if !futures.is_finite() || !spot.is_finite() {
        return Err(DeriveError::InvalidInput(format!(
            "non-finite basis input (futures={futures}, spot={spot})"
        )));
    }
    if spot == 0.0 {
        return Err(DeriveError::InvalidInput("spot price is zero".into()));
    }
    Ok((futures - spot) / spot)
}

/// `last / series[len - periods - 1] - 1`.
pub fn simple_return(series: &[f64], periods: usize) -> Option<f64> {
    if periods == 0 || series.len() < periods + 1 {
        return None;
    }
    let last = *series.last()?;
    let base = series[series.len() - periods - 1];
    if base == 0.0 {
        return None;
    }
    let r = last / base - 1.0;
    r.is_finite().then_some(r)
}

/// Day-over-day change in basis points, for series quoted in percent.
pub fn bp_change(series: &[f64]) -> Option<f64> {
    match series {
        [.., prev, last] => Some((last - prev) * 100.0),
        _ => None,
    }
}

/// Arms index (TRIN): `(adv / dec) / (adv_vol / dec_vol)`.
pub fn breadth_ratio(advances: f64, declines: f64, adv_volume: f64, dec_volume: f64) -> Option<f64> {
    if [advances, declines, adv_volume, dec_volume]
        .iter()
        .any(|v| !v.is_finite() || *v <= 0.0)
    {
        return None;
    }
    Some((advances / declines) / (adv_volume / dec_volume))
}

/// Spread between the latest values of two yield legs, in basis points.
pub fn yield_spread(long_leg: &[f64], short_leg: &[f64]) -> Option<f64> {
    let long = long_leg.last().filter(|v| v.is_finite())?;
    let short = short_leg.last().filter(|v| v.is_finite())?;
    Some((long - short) * 100.0)
}

/// Absolute and percent change of the last point versus the previous one.
///
/// The percent change is `None` when the previous value is zero.
pub fn series_change(series: &[f64]) -> (Option<f64>, Option<f64>) {
    match series {
        [.., prev, last] => {
            let abs = last - prev;
            let pct = (*prev != 0.0).then(|| abs / prev * 100.0);
            (Some(abs), pct)
        }
        _ => (None, None),
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn population_stdev(xs: &[f64]) -> f64 {
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-10;

    #[test]
    fn volatility_matches_hand_computation() {
        let prices = [100.0, 101.0, 102.0, 100.0, 99.0, 101.0, 103.0];
        let returns = [
            (100.0_f64 / 102.0).ln(),
            (99.0_f64 / 100.0).ln(),
            (101.0_f64 / 99.0).ln(),
            (103.0_f64 / 101.0).ln(),
        ];
        let m = returns.iter().sum::<f64>() / 4.0;
        let var = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / 4.0;
        let expected = var.sqrt() * 252.0_f64.sqrt();

        let vol = realized_volatility(&prices, 4).unwrap();
        assert!((vol - expected).abs() < EPS, "vol={vol} expected={expected}");
        assert!((vol - 0.2811).abs() < 1e-3);
    }

    #[test]
    fn volatility_insufficient_data_is_none() {
        assert_eq!(realized_volatility(&[100.0, 101.0, 102.0], 3), None);
        assert_eq!(realized_volatility(&[100.0, 101.0], 0), None);
        assert!(realized_volatility(&[100.0, 101.0, 102.0, 103.0], 3).is_some());
    }

    #[test]
    fn volatility_rejects_non_positive_prices() {
        assert_eq!(realized_volatility(&[100.0, 0.0, 102.0], 2), None);
    }

    #[test]
    fn volatility_of_flat_series_is_zero() {
        assert_eq!(realized_volatility(&[50.0; 10], 5), Some(0.0));
    }

    #[test]
    fn correlation_of_linear_series_is_one() {
        let a: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let b: Vec<f64> = a.iter().map(|x| 2.0 * x + 3.0).collect();
        let c = rolling_correlation(&a, &b, 20).unwrap();
        assert!((c - 1.0).abs() < EPS);

        let neg: Vec<f64> = a.iter().map(|x| -x).collect();
        let c = rolling_correlation(&a, &neg, 20).unwrap();
        assert!((c + 1.0).abs() < EPS);
    }

    #[test]
    fn correlation_tail_aligns_series() {
        // Leading junk in the longer series must not matter.
        let a = [999.0, -999.0, 1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = rolling_correlation(&a, &b, 4).unwrap();
        assert!((c - 1.0).abs() < EPS);
    }

    #[test]
    fn correlation_edge_cases() {
        assert_eq!(rolling_correlation(&[1.0, 2.0], &[1.0, 2.0], 1), None);
        assert_eq!(rolling_correlation(&[1.0, 2.0], &[1.0, 2.0, 3.0], 3), None);
        assert_eq!(rolling_correlation(&[5.0; 5], &[1.0, 2.0, 3.0, 4.0, 5.0], 5), None);
    }

    #[test]
    fn basis_scenario() {
        assert!((basis(105.0, 100.0).unwrap() - 0.05).abs() < EPS);
    }

    #[test]
    fn basis_zero_spot_is_error() {
        assert!(matches!(basis(105.0, 0.0), Err(DeriveError::InvalidInput(_))));
        assert!(basis(f64::NAN, 100.0).is_err());
    }

    #[test]
    fn simple_return_cases() {
        let s = [100.0, 110.0, 121.0];
        assert!((simple_return(&s, 1).unwrap() - 0.1).abs() < EPS);
        assert!((simple_return(&s, 2).unwrap() - 0.21).abs() < EPS);
        assert_eq!(simple_return(&s, 3), None);
        assert_eq!(simple_return(&[0.0, 5.0], 1), None);
    }

    #[test]
    fn bp_change_cases() {
        assert!((bp_change(&[4.10, 4.25]).unwrap() - 15.0).abs() < 1e-9);
        assert_eq!(bp_change(&[4.10]), None);
    }

    #[test]
    fn trin_scenario() {
        let trin = breadth_ratio(420.0, 370.0, 1000.0, 800.0).unwrap();
        let expected = (420.0 / 370.0) / (1000.0 / 800.0);
        assert!((trin - expected).abs() < EPS);
        assert!((trin - 0.908).abs() < 1e-3);
    }

    #[test]
    fn trin_requires_positive_inputs() {
        assert_eq!(breadth_ratio(420.0, 0.0, 1000.0, 800.0), None);
        assert_eq!(breadth_ratio(420.0, 370.0, -1.0, 800.0), None);
    }

    #[test]
    fn yield_spread_uses_latest_values() {
        let s = yield_spread(&[4.0, 4.3], &[4.6, 4.5]).unwrap();
        assert!((s + 20.0).abs() < 1e-9);
        assert_eq!(yield_spread(&[], &[4.5]), None);
    }

    #[test]
    fn series_change_cases() {
        let (abs, pct) = series_change(&[200.0, 210.0]);
        assert!((abs.unwrap() - 10.0).abs() < EPS);
        assert!((pct.unwrap() - 5.0).abs() < EPS);
        assert_eq!(series_change(&[0.0, 1.0]).1, None);
        assert_eq!(series_change(&[1.0]), (None, None));
    }
}
