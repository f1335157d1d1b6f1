//! Rolling-mean smoothing and lead/lag alignment.
use crate::error::{Error, Result};
use crate::field::Series;
use crate::time::TimeAxis;

/// Trailing rolling mean over `window` steps with the incomplete leading
/// `window - 1` steps dropped. A window of 0 or 1 leaves `x` unchanged.
///
/// A window containing NaN yields NaN.
pub fn rolling_mean(x: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return x.to_vec();
    }
    if x.len() < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(x.len() + 1 - window);
    let mut sum: f64 = x[..window].iter().sum();
    out.push(sum / window as f64);
    for i in window..x.len() {
        sum += x[i] - x[i - window];
        // A NaN that has left the window would otherwise poison the sum.
        if !sum.is_finite() {
            sum = x[i + 1 - window..=i].iter().sum();
        }
        out.push(sum / window as f64);
    }
    out
}

/// Predictor leads predictand by `lag` steps: `(x[..n-lag], y[lag..])`.
pub fn lag_pair<'a>(x: &'a [f64], y: &'a [f64], lag: usize) -> (&'a [f64], &'a [f64]) {
    let n = x.len().min(y.len());
    if lag >= n {
        return (&[], &[]);
    }
    (&x[..n - lag], &y[lag..n])
}

/// Smooth both series, align them on their common steps, then apply the
/// lead/lag. Returns the predictor and predictand ready for regression.
///
/// Both axes must share a step; annual series align by calendar year.
pub fn align_smoothed(x: &Series, y: &Series, smooth: usize, lag: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let xs = rolling_mean(&super::to_f64(&x.values), smooth);
    let ys = rolling_mean(&super::to_f64(&y.values), smooth);
    let skip = smooth.saturating_sub(1);
    let xa = x.time.skip(skip).truncate(xs.len());
    let ya = y.time.skip(skip).truncate(ys.len());

    let (xr, yr) = overlap(&xa, &ya).ok_or_else(|| {
        Error::InsufficientData(format!(
            "{} ({}..{}) and {} ({}..{}) share no time steps",
            x.name,
            xa.start,
            xa.end(),
            y.name,
            ya.start,
            ya.end()
        ))
    })?;
    let (px, py) = lag_pair(&xs[xr], &ys[yr], lag);
    Ok((px.to_vec(), py.to_vec()))
}

/// Index ranges into `a` and `b` covering their shared steps.
fn overlap(a: &TimeAxis, b: &TimeAxis) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
    if a.len == 0 || b.len == 0 || a.step != b.step {
        return None;
    }
    let start = a.start.max(b.start);
    let end = a.end().min(b.end());
    if start > end {
        return None;
    }
    let ia = a.index_of(start)?;
    let ib = b.index_of(start)?;
    let n = start.months_until(end) as usize / a.step.max(1) as usize + 1;
    Some((ia..ia + n, ib..ib + n))
}
