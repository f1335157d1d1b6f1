//! Time-series statistics used by every regression and residual pipeline.
pub mod detrend;
pub mod regression;
pub mod smooth;
mod special;

pub use detrend::{
    detrend_linear, gradient, monthly_climatology, remove_polynomial_fit, remove_seasonal_cycle, seasonal_magnitude,
};
pub use regression::{linear_regression, pearsonr, Correlation, Regression};
pub use smooth::{align_smoothed, lag_pair, rolling_mean};

/// Arithmetic mean. NaN for an empty slice.
pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Population standard deviation (divides by n).
pub fn std(x: &[f64]) -> f64 {
    let m = mean(x);
    (x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / x.len() as f64).sqrt()
}

/// Standard deviation over the finite values only.
pub fn nan_std(x: &[f32]) -> f64 {
    let v: Vec<f64> = x.iter().filter(|v| v.is_finite()).map(|&v| v as f64).collect();
    if v.is_empty() { f64::NAN } else { std(&v) }
}

/// Pearson correlation coefficient; 0 when either input is constant.
pub fn pearson_r(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mx = mean(x);
    let my = mean(y);
    let num: f64 = x.iter().zip(y).map(|(&a, &b)| (a - mx) * (b - my)).sum();
    let vx = x.iter().map(|&a| (a - mx).powi(2)).sum::<f64>().sqrt();
    let vy = y.iter().map(|&b| (b - my).powi(2)).sum::<f64>().sqrt();
    if vx < 1e-12 || vy < 1e-12 {
        return 0.0;
    }
    (num / (vx * vy)).clamp(-1.0, 1.0)
}

/// Lag-`k` autocorrelation: Pearson r of `x[..n-k]` against `x[k..]`.
pub fn autocorr(x: &[f64], k: usize) -> f64 {
    if k >= x.len() {
        return f64::NAN;
    }
    pearson_r(&x[..x.len() - k], &x[k..])
}

/// Widen f32 data to f64.
pub fn to_f64(x: &[f32]) -> Vec<f64> {
    x.iter().map(|&v| v as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn std_is_population_definition() {
        assert_relative_eq!(std(&[1.0, 2.0, 3.0, 4.0]), 1.118033988749895, epsilon = 1e-12);
    }

    #[test]
    fn pearson_of_constant_is_zero() {
        assert_eq!(pearson_r(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn autocorr_of_alternating_series_is_negative_one() {
        let x: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert_relative_eq!(autocorr(&x, 1), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn nan_std_ignores_missing() {
        assert_relative_eq!(nan_std(&[1.0, f32::NAN, 3.0]), 1.0, epsilon = 1e-12);
    }
}
