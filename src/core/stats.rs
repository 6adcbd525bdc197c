//! Descriptive statistics over raw return series.
//!
//! Degenerate inputs (empty series, a single observation, zero variance)
//! return zero instead of failing: callers filter their data up front and a
//! zero here means "not enough data", never a real estimate. Only genuinely
//! malformed input, such as two series of different lengths, is an error.

use serde::Serialize;

use super::error::LinalgError;
use super::linalg::{CovarianceMatrix, Matrix};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl Regression {
    const INSUFFICIENT: Regression = Regression {
        slope: 0.0,
        intercept: 0.0,
        r_squared: 0.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceKind {
    Sample,
    Population,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn variance(values: &[f64], kind: VarianceKind) -> f64 {
    let n = values.len();
    let denom = match kind {
        VarianceKind::Sample if n < 2 => return 0.0,
        VarianceKind::Sample => (n - 1) as f64,
        VarianceKind::Population if n == 0 => return 0.0,
        VarianceKind::Population => n as f64,
    };
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / denom
}

pub fn standard_deviation(values: &[f64], kind: VarianceKind) -> f64 {
    variance(values, kind).sqrt()
}

/// Sample covariance.
pub fn covariance(x: &[f64], y: &[f64]) -> Result<f64, LinalgError> {
    if x.len() != y.len() {
        return Err(LinalgError::length(x.len(), y.len()));
    }
    if x.len() < 2 {
        return Ok(0.0);
    }
    let mx = mean(x);
    let my = mean(y);
    let sum: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    Ok(sum / (x.len() - 1) as f64)
}

pub fn correlation(x: &[f64], y: &[f64]) -> Result<f64, LinalgError> {
    let cov = covariance(x, y)?;
    let sx = standard_deviation(x, VarianceKind::Sample);
    let sy = standard_deviation(y, VarianceKind::Sample);
    if sx == 0.0 || sy == 0.0 {
        return Ok(0.0);
    }
    Ok((cov / (sx * sy)).clamp(-1.0, 1.0))
}

/// Linear interpolation between adjacent ranks of the ascending sort.
/// `p` is clamped to [0, 100]; an empty slice yields 0.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, p)
}

pub(crate) fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}

/// Root mean square of the shortfalls below `target`, averaged over all
/// observations.
pub fn downside_deviation(returns: &[f64], target: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = returns
        .iter()
        .filter(|&&r| r < target)
        .map(|r| (target - r) * (target - r))
        .sum();
    (sum_sq / returns.len() as f64).sqrt()
}

/// Ordinary least squares fit of `y` on `x`.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Result<Regression, LinalgError> {
    if x.len() != y.len() {
        return Err(LinalgError::length(x.len(), y.len()));
    }
    if x.len() < 2 {
        return Ok(Regression::INSUFFICIENT);
    }

    let mx = mean(x);
    let my = mean(y);
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxx += (a - mx) * (a - mx);
        sxy += (a - mx) * (b - my);
        syy += (b - my) * (b - my);
    }
    if sxx == 0.0 {
        return Ok(Regression::INSUFFICIENT);
    }

    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let r_squared = if syy == 0.0 {
        // Horizontal data is fitted exactly by the horizontal line.
        1.0
    } else {
        let ss_res: f64 = x
            .iter()
            .zip(y)
            .map(|(a, b)| {
                let e = b - (intercept + slope * a);
                e * e
            })
            .sum();
        1.0 - ss_res / syy
    };

    Ok(Regression {
        slope,
        intercept,
        r_squared: r_squared.clamp(0.0, 1.0),
    })
}

/// Converts a cumulative return earned over `periods` into a compound
/// annual rate.
pub fn annualize_return(cumulative_return: f64, periods: u32, periods_per_year: u32) -> f64 {
    if periods == 0 || cumulative_return <= -1.0 {
        return if cumulative_return <= -1.0 { -1.0 } else { 0.0 };
    }
    let years = periods as f64 / periods_per_year as f64;
    (1.0 + cumulative_return).powf(1.0 / years) - 1.0
}

pub fn annualize_volatility(period_volatility: f64, periods_per_year: u32) -> f64 {
    period_volatility * (periods_per_year as f64).sqrt()
}

pub fn cumulative_return(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Mean excess return per unit of sample volatility, in the period units of
/// the input. Zero when the series has no dispersion.
pub fn sharpe_ratio(returns: &[f64], risk_free_per_period: f64) -> f64 {
    let sd = standard_deviation(returns, VarianceKind::Sample);
    if sd == 0.0 {
        return 0.0;
    }
    (mean(returns) - risk_free_per_period) / sd
}

pub fn sortino_ratio(returns: &[f64], target: f64) -> f64 {
    let dd = downside_deviation(returns, target);
    if dd == 0.0 {
        return 0.0;
    }
    (mean(returns) - target) / dd
}

/// Largest peak-to-trough decline of a value series, as a positive fraction
/// of the peak.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &v in values {
        peak = peak.max(v);
        if peak > 0.0 {
            worst = worst.max((peak - v) / peak);
        }
    }
    worst
}

/// Sample covariance matrix of several aligned return series.
pub fn covariance_matrix(series: &[Vec<f64>]) -> Result<CovarianceMatrix, LinalgError> {
    let n = series.len();
    let expected_len = series.first().map_or(0, Vec::len);
    if let Some(bad) = series.iter().find(|s| s.len() != expected_len) {
        return Err(LinalgError::length(expected_len, bad.len()));
    }

    let mut rows = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let c = covariance(&series[i], &series[j])?;
            rows[i][j] = c;
            rows[j][i] = c;
        }
    }
    CovarianceMatrix::new(Matrix::from_rows(&rows)?)
}

pub fn correlation_matrix(series: &[Vec<f64>]) -> Result<Matrix, LinalgError> {
    let n = series.len();
    let mut rows = vec![vec![0.0; n]; n];
    for i in 0..n {
        rows[i][i] = 1.0;
        for j in (i + 1)..n {
            let c = correlation(&series[i], &series[j])?;
            rows[i][j] = c;
            rows[j][i] = c;
        }
    }
    Matrix::from_rows(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop, prop_assert, proptest};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    #[test]
    fn mean_and_variance_use_sample_convention_by_default() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_close(mean(&xs), 5.0, 1e-12);
        assert_close(variance(&xs, VarianceKind::Population), 4.0, 1e-12);
        assert_close(variance(&xs, VarianceKind::Sample), 32.0 / 7.0, 1e-12);
        assert_close(standard_deviation(&xs, VarianceKind::Population), 2.0, 1e-12);
        assert_eq!(variance(&[1.0], VarianceKind::Sample), 0.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn correlation_is_zero_when_one_series_is_flat() {
        let x = [0.01, 0.02, -0.01, 0.03];
        let flat = [0.05; 4];
        assert_eq!(correlation(&x, &flat).unwrap(), 0.0);
        assert_close(correlation(&x, &x).unwrap(), 1.0, 1e-12);
    }

    #[test]
    fn covariance_rejects_misaligned_series() {
        assert!(matches!(
            covariance(&[1.0, 2.0], &[1.0]),
            Err(LinalgError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn percentile_matches_median_for_even_and_odd_lengths() {
        assert_close(percentile(&[1.0, 2.0, 3.0, 4.0], 50.0), 2.5, 1e-12);
        assert_close(percentile(&[5.0, 1.0, 3.0], 50.0), 3.0, 1e-12);
        assert_close(percentile(&[10.0, 20.0], 25.0), 12.5, 1e-12);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn downside_deviation_only_counts_shortfalls() {
        assert_eq!(downside_deviation(&[0.01, 0.02], 0.0), 0.0);
        assert_close(
            downside_deviation(&[-0.02, 0.04, -0.04, 0.01], 0.0),
            ((0.0004 + 0.0016) / 4.0_f64).sqrt(),
            1e-12,
        );
    }

    #[test]
    fn linear_regression_fits_exact_line() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        let fit = linear_regression(&x, &y).unwrap();
        assert_close(fit.slope, 2.0, 1e-12);
        assert_close(fit.intercept, 1.0, 1e-12);
        assert_close(fit.r_squared, 1.0, 1e-12);
    }

    #[test]
    fn linear_regression_degenerate_input_is_all_zero() {
        assert_eq!(
            linear_regression(&[1.0], &[2.0]).unwrap(),
            Regression::INSUFFICIENT
        );
        assert_eq!(
            linear_regression(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]).unwrap(),
            Regression::INSUFFICIENT
        );
    }

    #[test]
    fn annualization_compounds_and_scales_by_root_time() {
        assert_close(annualize_return(0.21, 24, 12), 0.1, 1e-12);
        assert_eq!(annualize_return(0.5, 0, 12), 0.0);
        assert_close(annualize_volatility(0.01, 252), 0.01 * 252f64.sqrt(), 1e-15);
    }

    #[test]
    fn max_drawdown_tracks_worst_peak_to_trough() {
        assert_close(max_drawdown(&[100.0, 120.0, 90.0, 130.0, 104.0]), 0.25, 1e-12);
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn covariance_matrix_is_symmetric_with_variances_on_diagonal() {
        let a = vec![0.01, 0.03, -0.02, 0.04];
        let b = vec![0.02, 0.01, 0.00, 0.03];
        let cov = covariance_matrix(&[a.clone(), b.clone()]).unwrap();
        assert_close(
            cov.variance(0),
            variance(&a, VarianceKind::Sample),
            1e-15,
        );
        assert_close(cov.matrix().get(0, 1), cov.matrix().get(1, 0), 0.0);
        assert!(covariance_matrix(&[a, vec![0.1]]).is_err());
    }

    #[test]
    fn ratios_are_zero_without_dispersion() {
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 0.0), 0.0);
        assert_eq!(sortino_ratio(&[0.01, 0.02], 0.0), 0.0);
        assert!(sortino_ratio(&[0.03, -0.01, 0.02], 0.0) > 0.0);
    }

    proptest! {
        #[test]
        fn prop_percentile_is_bounded_and_monotone(
            values in prop::collection::vec(-1_000.0f64..1_000.0, 1..60),
            p in 0.0f64..100.0,
        ) {
            let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let v = percentile(&values, p);
            prop_assert!(v >= lo - 1e-9 && v <= hi + 1e-9);
            prop_assert!(percentile(&values, (p + 5.0).min(100.0)) >= v - 1e-9);
        }
    }
}
