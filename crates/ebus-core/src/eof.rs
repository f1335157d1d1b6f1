//! Empirical orthogonal functions and the NPGO index.
//!
//! The decomposition is uncentred and area-weighted: the input anomalies are
//! multiplied by per-point weights, the smaller of the two Gram matrices is
//! eigen-decomposed, and the singular vectors are recovered from it. Points
//! with a missing value at any record are left out and come back NaN.
use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::field::{nan_as_null_f64, nan_mean, Field, Series};
use crate::grid::{nearest_index, select_box};
use crate::region::Bounds;
use crate::stats::pearson_r;

/// Northeast Pacific domain of the NPGO.
pub const NPGO_DOMAIN: Bounds = Bounds { lat1: 25.0, lat2: 62.0, lon1: 180.0, lon2: 250.0 };
/// Point where the NPGO pattern is made positive.
pub const NPGO_SIGN_POINT: (f64, f64) = (45.5, 210.0);

/// Leading modes of a weighted, uncentred EOF analysis.
#[derive(Debug, Clone)]
pub struct Eof {
    /// Variance of each mode (λ / (records − 1)).
    pub eigenvalues: Vec<f64>,
    pub variance_fraction: Vec<f64>,
    /// Unit-length patterns in weighted space, one per mode, NaN at
    /// excluded points.
    pub patterns: Vec<Vec<f64>>,
    /// Unscaled principal components, one per mode.
    pub pcs: Vec<Vec<f64>>,
    weights: Vec<f64>,
    valid: Vec<bool>,
}

impl Eof {
    /// Decompose `data[record][point]` weighted by `weights[point]`.
    pub fn solve(data: &[Vec<f64>], weights: &[f64], n_modes: usize) -> Result<Self> {
        let records = data.len();
        let points = weights.len();
        if records < 2 {
            return Err(Error::InsufficientData(format!("{records} records; EOF needs at least 2")));
        }
        if data.iter().any(|r| r.len() != points) {
            return Err(Error::Shape(format!("EOF records do not all have {points} points")));
        }
        let valid: Vec<bool> = (0..points)
            .map(|p| weights[p].is_finite() && data.iter().all(|r| r[p].is_finite()))
            .collect();
        let cols: Vec<usize> = (0..points).filter(|&p| valid[p]).collect();
        if cols.is_empty() {
            return Err(Error::InsufficientData("every EOF point has missing data".into()));
        }
        let n_modes = n_modes.min(records).min(cols.len());

        let x = DMatrix::from_fn(records, cols.len(), |t, k| data[t][cols[k]] * weights[cols[k]]);

        // Eigen-decompose whichever Gram matrix is smaller.
        let (lambda, space_vecs, time_vecs) = if records <= cols.len() {
            let eig = SymmetricEigen::new(&x * x.transpose());
            let order = descending(eig.eigenvalues.as_slice());
            let lambda: Vec<f64> = order.iter().map(|&i| eig.eigenvalues[i].max(0.0)).collect();
            let mut space = Vec::with_capacity(n_modes);
            let mut time = Vec::with_capacity(n_modes);
            for (m, &i) in order.iter().take(n_modes).enumerate() {
                let u = eig.eigenvectors.column(i);
                let s = lambda[m].sqrt();
                let e = x.transpose() * u;
                space.push(e.iter().map(|v| if s > 0.0 { v / s } else { 0.0 }).collect::<Vec<f64>>());
                time.push(u.iter().map(|v| v * s).collect::<Vec<f64>>());
            }
            (lambda, space, time)
        } else {
            let eig = SymmetricEigen::new(x.transpose() * &x);
            let order = descending(eig.eigenvalues.as_slice());
            let lambda: Vec<f64> = order.iter().map(|&i| eig.eigenvalues[i].max(0.0)).collect();
            let mut space = Vec::with_capacity(n_modes);
            let mut time = Vec::with_capacity(n_modes);
            for &i in order.iter().take(n_modes) {
                let e = eig.eigenvectors.column(i);
                let pc = &x * e;
                space.push(e.iter().copied().collect::<Vec<f64>>());
                time.push(pc.iter().copied().collect::<Vec<f64>>());
            }
            (lambda, space, time)
        };

        let total: f64 = lambda.iter().sum();
        if total <= 0.0 {
            return Err(Error::InsufficientData("EOF input has zero variance".into()));
        }
        let dof = (records - 1) as f64;
        let eigenvalues = lambda.iter().take(n_modes).map(|l| l / dof).collect();
        let variance_fraction = lambda.iter().take(n_modes).map(|l| l / total).collect();
        let patterns = space_vecs
            .into_iter()
            .map(|e| {
                let mut full = vec![f64::NAN; points];
                for (k, &p) in cols.iter().enumerate() {
                    full[p] = e[k];
                }
                full
            })
            .collect();
        debug!(records, points = cols.len(), n_modes, "EOF solved");

        Ok(Self {
            eigenvalues,
            variance_fraction,
            patterns,
            pcs: time_vecs,
            weights: weights.to_vec(),
            valid,
        })
    }

    pub fn n_modes(&self) -> usize {
        self.patterns.len()
    }

    /// Project other records (e.g. monthly data for an annual EOF) onto the
    /// patterns. With `unit_variance` the pseudo-PCs are divided by √λ so
    /// the PCs of the original data would have unit variance.
    ///
    /// A record missing any retained point projects to NaN.
    pub fn project(&self, data: &[Vec<f64>], unit_variance: bool) -> Result<Vec<Vec<f64>>> {
        let points = self.weights.len();
        if data.iter().any(|r| r.len() != points) {
            return Err(Error::Shape(format!("projected records do not all have {points} points")));
        }
        let out = (0..self.n_modes())
            .map(|m| {
                let scale = if unit_variance { self.eigenvalues[m].sqrt() } else { 1.0 };
                data.iter()
                    .map(|rec| {
                        let mut acc = 0.0;
                        for p in (0..points).filter(|&p| self.valid[p]) {
                            let v = rec[p];
                            if !v.is_finite() {
                                return f64::NAN;
                            }
                            acc += v * self.weights[p] * self.patterns[m][p];
                        }
                        acc / scale
                    })
                    .collect()
            })
            .collect();
        Ok(out)
    }

    /// Correlation between each PC and the input at every point.
    pub fn eofs_as_correlation(&self, data: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let points = self.weights.len();
        self.pcs
            .iter()
            .map(|pc| {
                (0..points)
                    .map(|p| {
                        if !self.valid[p] {
                            return f64::NAN;
                        }
                        let col: Vec<f64> = data.iter().map(|r| r[p]).collect();
                        pearson_r(pc, &col)
                    })
                    .collect()
            })
            .collect()
    }
}

fn descending(vals: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..vals.len()).collect();
    idx.sort_by(|&a, &b| vals[b].total_cmp(&vals[a]));
    idx
}

/// NPGO index for one ensemble member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpgoResult {
    pub member: String,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    /// Correlation between the PC and JFM SST anomalies, `lat × lon`.
    #[serde(with = "nan_as_null_f64")]
    pub eof: Vec<f64>,
    /// Monthly pseudo-PC.
    pub pc: Series,
    pub variance_fraction: f64,
    pub description: String,
}

/// JFM means per calendar year, `[year][cell]`, over the surface level.
/// Years without a January-March month are skipped.
pub fn jfm_annual_means(field: &Field) -> Vec<Vec<f64>> {
    let cells = field.grid.cells();
    field
        .time
        .years()
        .into_iter()
        .filter_map(|(_, idx)| {
            let winter: Vec<usize> = idx.into_iter().filter(|&i| field.time.month_of(i) <= 3).collect();
            if winter.is_empty() {
                return None;
            }
            let row: Vec<f64> = (0..cells)
                .map(|c| nan_mean(winter.iter().map(|&t| field.data[t * field.levels * cells + c])) as f64)
                .collect();
            Some(row)
        })
        .collect()
}

/// Second EOF of JFM SST residuals over the Northeast Pacific, on a
/// regular 1° grid.
///
/// Weights are √cos(lat). The monthly index is the projection of every
/// month onto the winter pattern, scaled to unit variance, with the sign
/// chosen so the pattern is positive at 45.5°N 210°E.
pub fn npgo(residual_sst: &Field, member: &str) -> Result<NpgoResult> {
    let boxed = select_box(residual_sst, NPGO_DOMAIN)?;
    let grid = &boxed.grid;
    let weights: Vec<f64> = grid.lat.iter().map(|la| la.to_radians().cos().max(0.0).sqrt()).collect();

    let winter = jfm_annual_means(&boxed);
    info!(member, years = winter.len(), cells = grid.cells(), "solving NPGO EOF");
    let solver = Eof::solve(&winter, &weights, 2)?;
    if solver.n_modes() < 2 {
        return Err(Error::InsufficientData("NPGO needs a second EOF mode".into()));
    }

    let mut eof = solver.eofs_as_correlation(&winter).swap_remove(1);
    let cells = grid.cells();
    let monthly: Vec<Vec<f64>> = (0..boxed.time.len)
        .map(|t| {
            (0..cells)
                .map(|c| boxed.data[t * boxed.levels * cells + c] as f64)
                .collect()
        })
        .collect();
    let mut pc = solver.project(&monthly, true)?.swap_remove(1);

    let (j, i) = nearest_index(grid, NPGO_SIGN_POINT.0, NPGO_SIGN_POINT.1)?;
    let anchor = eof[grid.idx(j, i)];
    if anchor.is_nan() || anchor <= 0.0 {
        eof.iter_mut().for_each(|v| *v = -*v);
        pc.iter_mut().for_each(|v| *v = -*v);
    }

    Ok(NpgoResult {
        member: member.to_string(),
        lat: grid.lat_1d(),
        lon: grid.lon_1d(),
        eof,
        pc: Series::new("pc", boxed.time, pc.into_iter().map(|v| v as f32).collect())?,
        variance_fraction: solver.variance_fraction[1],
        description: "Second mode of JFM SSTa variability over 25-62N and 180-110W.".into(),
    })
}
