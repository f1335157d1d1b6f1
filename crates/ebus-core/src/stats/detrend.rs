//! Trend and seasonal-cycle removal.
use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::time::TimeAxis;

/// Remove the least-squares line. Series containing NaN come back all NaN.
pub fn detrend_linear(x: &[f64]) -> Vec<f64> {
    remove_polynomial_fit(x, 1).unwrap_or_else(|_| vec![f64::NAN; x.len()])
}

/// Subtract a least-squares polynomial of degree `order`.
///
/// Time is rescaled to -1..1 before fitting so high orders stay well
/// conditioned over 1000+ monthly steps. Any NaN in `x` yields all NaN
/// (a land cell).
pub fn remove_polynomial_fit(x: &[f64], order: usize) -> Result<Vec<f64>> {
    let n = x.len();
    if n <= order {
        return Err(Error::InsufficientData(format!(
            "{n} points cannot constrain a degree-{order} fit"
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Ok(vec![f64::NAN; n]);
    }
    let half = (n - 1) as f64 / 2.0;
    let scale = if half > 0.0 { half } else { 1.0 };
    let t: Vec<f64> = (0..n).map(|i| (i as f64 - half) / scale).collect();

    let a = DMatrix::from_fn(n, order + 1, |i, k| t[i].powi(k as i32));
    let b = DVector::from_column_slice(x);
    let coef = a
        .clone()
        .svd(true, true)
        .solve(&b, 1e-12)
        .map_err(|e| Error::InsufficientData(format!("polynomial fit failed: {e}")))?;
    let fit = &a * coef;
    Ok(x.iter().zip(fit.iter()).map(|(v, f)| v - f).collect())
}

/// NaN-skipping mean of each calendar month (index 0 = January).
pub fn monthly_climatology(x: &[f64], axis: &TimeAxis) -> [f64; 12] {
    let mut sum = [0.0f64; 12];
    let mut cnt = [0usize; 12];
    for (i, &v) in x.iter().enumerate().take(axis.len) {
        if v.is_finite() {
            let m = axis.month_of(i) as usize - 1;
            sum[m] += v;
            cnt[m] += 1;
        }
    }
    let mut out = [f64::NAN; 12];
    for m in 0..12 {
        if cnt[m] > 0 {
            out[m] = sum[m] / cnt[m] as f64;
        }
    }
    out
}

/// Anomalies from the monthly climatology.
pub fn remove_seasonal_cycle(x: &[f64], axis: &TimeAxis) -> Vec<f64> {
    let clim = monthly_climatology(x, axis);
    x.iter()
        .enumerate()
        .map(|(i, &v)| v - clim[axis.month_of(i) as usize - 1])
        .collect()
}

/// Peak-to-trough amplitude of the monthly climatology; NaN if no month has data.
pub fn seasonal_magnitude(x: &[f64], axis: &TimeAxis) -> f64 {
    let clim = monthly_climatology(x, axis);
    let finite = clim.iter().copied().filter(|v| v.is_finite());
    let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo.is_finite() { hi - lo } else { f64::NAN }
}

/// Second-order central differences in the interior, first-order at the
/// ends, with unit spacing.
pub fn gradient(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    x[1] - x[0]
                } else if i == n - 1 {
                    x[n - 1] - x[n - 2]
                } else {
                    (x[i + 1] - x[i - 1]) / 2.0
                }
            })
            .collect(),
    }
}
