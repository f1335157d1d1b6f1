//! Ordinary least squares and Pearson correlation with significance.
use serde::{Deserialize, Serialize};

use super::special::t_two_sided_p;
use super::{autocorr, mean, pearson_r};
use crate::error::{Error, Result};

/// Result of a simple linear regression of `y` on `x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r: f64,
    /// Two-sided p-value for a zero slope (t-test, n − 2 dof).
    pub p: f64,
    /// Standard error of the slope.
    pub stderr: f64,
}

/// Pearson correlation whose significance accounts for serial correlation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub r: f64,
    pub p: f64,
    /// Effective sample size after lag-1 autocorrelation.
    pub n_eff: f64,
}

impl Regression {
    pub const NAN: Regression = Regression {
        slope: f64::NAN,
        intercept: f64::NAN,
        r: f64::NAN,
        p: f64::NAN,
        stderr: f64::NAN,
    };
}

impl Correlation {
    pub const NAN: Correlation = Correlation { r: f64::NAN, p: f64::NAN, n_eff: f64::NAN };
}

fn check_pair(x: &[f64], y: &[f64]) -> Result<usize> {
    if x.len() != y.len() {
        return Err(Error::Shape(format!(
            "regression inputs differ in length ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 3 {
        return Err(Error::InsufficientData(format!(
            "{} points; need at least 3",
            x.len()
        )));
    }
    Ok(x.len())
}

/// Least-squares fit of `y = slope·x + intercept`.
///
/// r is clamped to ±1 and the p-value
/// uses a Student-t with n − 2 degrees of freedom. A constant `x` has no
/// defined slope and is rejected.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Result<Regression> {
    let n = check_pair(x, y)?;
    let nf = n as f64;
    let mx = mean(x);
    let my = mean(y);
    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
        sxy += (a - mx) * (b - my);
    }
    let (sxx, syy, sxy) = (sxx / nf, syy / nf, sxy / nf);
    if sxx == 0.0 {
        return Err(Error::InsufficientData(
            "all x values are identical; slope undefined".into(),
        ));
    }

    let r = if syy == 0.0 { 0.0 } else { (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0) };
    let slope = sxy / sxx;
    let intercept = my - slope * mx;

    const TINY: f64 = 1e-20;
    let df = nf - 2.0;
    let t = r * (df / ((1.0 - r + TINY) * (1.0 + r + TINY))).sqrt();
    let p = t_two_sided_p(t, df);
    let stderr = ((1.0 - r * r) * syy / sxx / df).sqrt();

    Ok(Regression { slope, intercept, r, p, stderr })
}

/// Pearson r with a p-value from the effective sample size
/// `n_eff = n (1 − ρx ρy) / (1 + ρx ρy)`, ρ being the lag-1
/// autocorrelations of each input.
///
/// Perfectly anti-persistent pairs (ρx ρy = −1) have no finite `n_eff` and
/// are rejected.
pub fn pearsonr(x: &[f64], y: &[f64]) -> Result<Correlation> {
    let n = check_pair(x, y)?;
    let r = pearson_r(x, y);
    let rho = autocorr(x, 1) * autocorr(y, 1);
    if 1.0 + rho <= 1e-12 {
        return Err(Error::InsufficientData(format!(
            "lag-1 autocorrelation product {rho} leaves no effective sample size"
        )));
    }
    let n_eff = n as f64 * (1.0 - rho) / (1.0 + rho);
    let df = n_eff - 2.0;
    let p = if df <= 0.0 {
        f64::NAN
    } else if r.abs() >= 1.0 {
        0.0
    } else {
        t_two_sided_p(r * (df / (1.0 - r * r)).sqrt(), df)
    };
    Ok(Correlation { r, p, n_eff })
}
