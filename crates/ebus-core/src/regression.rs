//! Ensemble and gridcell regressions against a predictor series.
//!
//! Every regression follows the same recipe: smooth both inputs with a
//! trailing rolling mean, align them on their shared months, shift so the
//! predictor leads by `lag` months, then fit `y = m·x + b`.
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::field::{nan_as_null_f64, opt_nan_as_null_f64, EnsembleSeries, Field, Series};
use crate::par::map_cells;
use crate::stats::{align_smoothed, linear_regression, pearsonr};

/// Which statistic supplies r and p in a member table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Significance {
    /// r and p from the least-squares fit (n − 2 dof).
    Ordinary,
    /// r, p and n_eff from the autocorrelation-aware Pearson test.
    EffectiveSampleSize,
}

/// One regression per ensemble member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTable {
    pub predictor: String,
    pub predictand: String,
    pub lag: usize,
    pub smooth: usize,
    pub members: Vec<String>,
    #[serde(with = "nan_as_null_f64")]
    pub m: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub r: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub p: Vec<f64>,
    #[serde(default, with = "opt_nan_as_null_f64", skip_serializing_if = "Option::is_none")]
    pub n_eff: Option<Vec<f64>>,
}

/// Fit `y` on `x` for every member of `y`.
///
/// `x` rows are matched to `y` by member id. A single-row `x` is shared by
/// every member (an index that exists once, such as an observation).
/// Members whose aligned series contain NaN get NaN statistics.
pub fn regress_members(
    x: &EnsembleSeries,
    y: &EnsembleSeries,
    lag: usize,
    smooth: usize,
    significance: Significance,
) -> Result<RegressionTable> {
    let n = y.members.len();
    let mut table = RegressionTable {
        predictor: x.name.clone(),
        predictand: y.name.clone(),
        lag,
        smooth,
        members: y.members.clone(),
        m: Vec::with_capacity(n),
        r: Vec::with_capacity(n),
        p: Vec::with_capacity(n),
        n_eff: (significance == Significance::EffectiveSampleSize).then(|| Vec::with_capacity(n)),
    };

    for (id, ys) in y.members.iter().zip(&y.data) {
        let xs = if x.data.len() == 1 { &x.data[0] } else { x.member(id)? };
        let (px, py) = align_smoothed(xs, ys, smooth, lag)?;
        if px.iter().chain(&py).any(|v| !v.is_finite()) {
            warn!(member = %id, "missing values in aligned series; writing NaN");
            table.m.push(f64::NAN);
            table.r.push(f64::NAN);
            table.p.push(f64::NAN);
            if let Some(ne) = table.n_eff.as_mut() {
                ne.push(f64::NAN);
            }
            continue;
        }
        let reg = linear_regression(&px, &py)?;
        table.m.push(reg.slope);
        match significance {
            Significance::Ordinary => {
                table.r.push(reg.r);
                table.p.push(reg.p);
            }
            Significance::EffectiveSampleSize => {
                let c = pearsonr(&px, &py)?;
                table.r.push(c.r);
                table.p.push(c.p);
                if let Some(ne) = table.n_eff.as_mut() {
                    ne.push(c.n_eff);
                }
            }
        }
        debug!(member = %id, n = px.len(), "member regression done");
    }
    Ok(table)
}

/// Which side of a gridcell regression leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// The gridcell is the predictor; the series is predicted.
    FieldPredicts,
    /// The series is the predictor; each gridcell is predicted.
    SeriesPredicts,
}

/// Slope, correlation and p-value at every gridcell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMap {
    pub predictor: String,
    pub predictand: String,
    pub direction: Direction,
    pub lag: usize,
    pub smooth: usize,
    pub nlat: usize,
    pub nlon: usize,
    #[serde(with = "nan_as_null_f64")]
    pub lat: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub lon: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub m: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub r: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub p: Vec<f64>,
}

/// Regress every surface gridcell of `field` against `series`.
///
/// Cells with any missing value (coastlines, land) come back NaN, as do
/// cells whose fit is undefined (a constant predictor).
pub fn regress_map(field: &Field, series: &Series, lag: usize, smooth: usize, direction: Direction) -> Result<RegressionMap> {
    let grid = &field.grid;
    if field.time.len == 0 || series.time.len == 0 {
        return Err(Error::InsufficientData(format!(
            "{} or {} has an empty time axis",
            field.name, series.name
        )));
    }
    if field.time.step != series.time.step {
        return Err(Error::Shape(format!(
            "{} steps {} months but {} steps {}",
            field.name, field.time.step, series.name, series.time.step
        )));
    }

    let fits = map_cells(grid.cells(), |c| {
        let values = field.series_at_cell(c);
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let cell = Series { name: field.name.clone(), time: field.time, values };
        let (x, y) = match direction {
            Direction::FieldPredicts => (&cell, series),
            Direction::SeriesPredicts => (series, &cell),
        };
        let (px, py) = align_smoothed(x, y, smooth, lag).ok()?;
        if py.iter().chain(&px).any(|v| !v.is_finite()) {
            return None;
        }
        linear_regression(&px, &py).ok()
    });

    let valid = fits.iter().filter(|f| f.is_some()).count();
    debug!(cells = grid.cells(), valid, "gridcell regressions done");
    if valid == 0 {
        warn!(field = %field.name, "no gridcell produced a regression");
    }

    let (predictor, predictand) = match direction {
        Direction::FieldPredicts => (field.name.clone(), series.name.clone()),
        Direction::SeriesPredicts => (series.name.clone(), field.name.clone()),
    };
    let pick = |g: fn(&crate::stats::Regression) -> f64| -> Vec<f64> {
        fits.iter().map(|f| f.as_ref().map_or(f64::NAN, g)).collect()
    };
    Ok(RegressionMap {
        predictor,
        predictand,
        direction,
        lag,
        smooth,
        nlat: grid.nlat,
        nlon: grid.nlon,
        lat: grid.lat.clone(),
        lon: grid.lon.clone(),
        m: pick(|r| r.slope),
        r: pick(|r| r.r),
        p: pick(|r| r.p),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;
    use crate::time::{TimeAxis, YearMonth};
    use approx::assert_relative_eq;

    fn axis(n: usize) -> TimeAxis {
        TimeAxis::new(YearMonth::new(1920, 1), n)
    }

    fn wiggle(n: usize, phase: f64) -> Vec<f32> {
        (0..n).map(|i| ((i as f64 * 0.7 + phase).sin() + (i as f64 * 0.13).cos()) as f32).collect()
    }

    #[test]
    fn lagged_copy_is_recovered_at_the_right_lag() {
        let n = 60;
        let x = wiggle(n + 2, 0.0);
        // y[t] = 2·x[t-2]
        let y: Vec<f32> = (0..n).map(|t| if t >= 2 { 2.0 * x[t - 2] } else { 0.0 }).collect();
        let xs = EnsembleSeries::new("NPGO", vec!["001".into()], axis(n), vec![x[..n].to_vec()]).unwrap();
        let ys = EnsembleSeries::new("FG_CO2", vec!["001".into()], axis(n), vec![y]).unwrap();
        let t = regress_members(&xs, &ys, 2, 0, Significance::Ordinary).unwrap();
        assert_relative_eq!(t.m[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(t.r[0], 1.0, epsilon = 1e-6);
        assert!(t.n_eff.is_none());
    }

    #[test]
    fn annual_index_aligns_with_later_start_year() {
        let yearly = [0.0f32, 3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0];
        let monthly: Vec<f32> = (0..120).map(|t| yearly[t / 12]).collect();
        let ys = EnsembleSeries::new("SST", vec!["001".into()], axis(120), vec![monthly]).unwrap();
        let xs = EnsembleSeries::new("AMOC", vec!["001".into()], TimeAxis::annual(1922, 8), vec![yearly[2..].to_vec()])
            .unwrap();
        let t = regress_members(&xs, &ys.resample_annual(), 0, 0, Significance::EffectiveSampleSize).unwrap();
        assert_relative_eq!(t.m[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(t.r[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn annual_series_cannot_map_monthly_field() {
        let g = Grid::regular(&[0.0], &[0.0]);
        let field = Field::new("FG_CO2", axis(36), g, 1, wiggle(36, 0.0)).unwrap();
        let amoc = Series::new("AMOC", TimeAxis::annual(1920, 3), vec![1.0, 2.0, 0.5]).unwrap();
        assert!(matches!(
            regress_map(&field, &amoc, 0, 0, Direction::SeriesPredicts),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn members_are_matched_by_id() {
        let n = 40;
        let a = wiggle(n, 0.0);
        let b = wiggle(n, 1.0);
        let xs = EnsembleSeries::new("PDO", vec!["002".into(), "001".into()], axis(n), vec![b.clone(), a.clone()]).unwrap();
        let ya: Vec<f32> = a.iter().map(|v| 3.0 * v).collect();
        let yb: Vec<f32> = b.iter().map(|v| -1.0 * v).collect();
        let ys = EnsembleSeries::new("SST", vec!["001".into(), "002".into()], axis(n), vec![ya, yb]).unwrap();
        let t = regress_members(&xs, &ys, 0, 0, Significance::EffectiveSampleSize).unwrap();
        assert_relative_eq!(t.m[0], 3.0, epsilon = 1e-5);
        assert_relative_eq!(t.m[1], -1.0, epsilon = 1e-5);
        assert_eq!(t.n_eff.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn unknown_member_is_an_error() {
        let xs = EnsembleSeries::new("PDO", vec!["001".into(), "002".into()], axis(10), vec![wiggle(10, 0.0), wiggle(10, 1.0)]).unwrap();
        let ys = EnsembleSeries::new("SST", vec!["009".into()], axis(10), vec![wiggle(10, 2.0)]).unwrap();
        assert!(matches!(
            regress_members(&xs, &ys, 0, 0, Significance::Ordinary),
            Err(Error::UnknownMember(_))
        ));
    }

    #[test]
    fn gridcell_map_masks_land() {
        let n = 36;
        let g = Grid::regular(&[30.0], &[230.0, 231.0]);
        let idx = wiggle(n, 0.3);
        let mut data = vec![0.0f32; n * 2];
        for t in 0..n {
            data[t * 2] = 0.5 * idx[t] + 1.0;
            data[t * 2 + 1] = f32::NAN;
        }
        let f = Field::new("FG_CO2", axis(n), g, 1, data).unwrap();
        let s = Series::new("NPGO", axis(n), idx).unwrap();
        let map = regress_map(&f, &s, 0, 0, Direction::SeriesPredicts).unwrap();
        assert_relative_eq!(map.m[0], 0.5, epsilon = 1e-5);
        assert!(map.m[1].is_nan() && map.r[1].is_nan() && map.p[1].is_nan());
        assert_eq!(map.predictor, "NPGO");

        let inverse = regress_map(&f, &s, 0, 0, Direction::FieldPredicts).unwrap();
        assert_relative_eq!(inverse.m[0], 2.0, epsilon = 1e-4);
        assert_eq!(inverse.predictor, "FG_CO2");
    }

    #[test]
    fn smoothing_shortens_but_keeps_relationship() {
        let n = 48;
        let g = Grid::regular(&[0.0], &[0.0]);
        let idx = wiggle(n, 0.0);
        let data: Vec<f32> = idx.iter().map(|v| 4.0 * v).collect();
        let f = Field::new("SST", axis(n), g, 1, data).unwrap();
        let s = Series::new("ENSO", axis(n), idx).unwrap();
        let map = regress_map(&f, &s, 1, 12, Direction::SeriesPredicts).unwrap();
        assert!(map.m[0].is_finite());
        let map0 = regress_map(&f, &s, 0, 12, Direction::SeriesPredicts).unwrap();
        assert_relative_eq!(map0.m[0], 4.0, epsilon = 1e-4);
    }
}
