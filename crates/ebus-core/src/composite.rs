//! Composite maps of residual fields conditioned on a climate index.
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::field::{nan_as_null_f64, EnsembleField, EnsembleSeries};
use crate::grid::select_box;
use crate::region::Ebus;
use crate::stats;

/// Threshold in standard deviations of the index.
pub const SIGMA: f64 = 2.0;

/// Index phase of one (member, month).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Positive,
    Negative,
    Neutral,
}

impl Phase {
    /// `+t` and `-t` are inclusive for the extremes; neutral is strictly inside.
    pub fn classify(v: f64, threshold: f64) -> Option<Phase> {
        if !v.is_finite() {
            None
        } else if v >= threshold {
            Some(Phase::Positive)
        } else if v <= -threshold {
            Some(Phase::Negative)
        } else {
            Some(Phase::Neutral)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub index: String,
    pub variable: String,
    pub threshold: f64,
    pub nlat: usize,
    pub nlon: usize,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub pos_composite: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub neg_composite: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub neu_composite: Vec<f64>,
    /// Events per calendar month, January first.
    pub pos_months: [usize; 12],
    pub neg_months: [usize; 12],
    pub neu_months: [usize; 12],
}

/// Crop every member to the system's composite domain (regular grids).
pub fn crop_to_domain(ensemble: &EnsembleField, ebus: Ebus) -> Result<EnsembleField> {
    let bounds = ebus.composite_domain()?;
    let fields = ensemble
        .fields
        .iter()
        .map(|f| select_box(f, bounds))
        .collect::<Result<Vec<_>>>()?;
    EnsembleField::new(ensemble.members.clone(), fields)
}

/// Positive, negative and neutral composites of `residuals` keyed on
/// `index`, with thresholds at ±2σ of the index over all members and months.
///
/// The composite is the mean over members at each month, then the mean over
/// months. Members are matched by id and months by calendar date.
pub fn composite(index: &EnsembleSeries, residuals: &EnsembleField) -> Result<CompositeResult> {
    let all: Vec<f32> = index.data.iter().flat_map(|s| s.values.iter().copied()).collect();
    let threshold = SIGMA * stats::nan_std(&all);
    if !threshold.is_finite() {
        return Err(Error::InsufficientData(format!("{} has no finite values", index.name)));
    }

    let mut pos_months = [0usize; 12];
    let mut neg_months = [0usize; 12];
    let mut neu_months = [0usize; 12];
    for s in &index.data {
        for (t, &v) in s.values.iter().enumerate() {
            let m = s.time.month_of(t) as usize - 1;
            match Phase::classify(v as f64, threshold) {
                Some(Phase::Positive) => pos_months[m] += 1,
                Some(Phase::Negative) => neg_months[m] += 1,
                Some(Phase::Neutral) => neu_months[m] += 1,
                None => {}
            }
        }
    }

    let template = residuals.template();
    let axis = template.time;
    let cells = template.grid.cells();
    // phases[member][t] on the residual axis.
    let phases = residuals
        .members
        .iter()
        .map(|id| {
            let s = index.member(id)?;
            Ok((0..axis.len)
                .map(|t| {
                    s.time
                        .index_of(axis.at(t))
                        .and_then(|k| Phase::classify(s.values[k] as f64, threshold))
                })
                .collect::<Vec<_>>())
        })
        .collect::<Result<Vec<_>>>()?;

    let build = |phase: Phase| -> Vec<f64> {
        (0..cells)
            .map(|c| {
                let (mut sum, mut n) = (0.0f64, 0usize);
                for t in 0..axis.len {
                    let (mut ms, mut mn) = (0.0f64, 0usize);
                    for (f, ph) in residuals.fields.iter().zip(&phases) {
                        if ph[t] != Some(phase) {
                            continue;
                        }
                        let v = f.data[t * f.levels * cells + c];
                        if v.is_finite() {
                            ms += v as f64;
                            mn += 1;
                        }
                    }
                    if mn > 0 {
                        sum += ms / mn as f64;
                        n += 1;
                    }
                }
                if n > 0 { sum / n as f64 } else { f64::NAN }
            })
            .collect()
    };

    info!(
        index = %index.name,
        threshold,
        positive = pos_months.iter().sum::<usize>(),
        negative = neg_months.iter().sum::<usize>(),
        "compositing"
    );
    Ok(CompositeResult {
        index: index.name.clone(),
        variable: template.name.clone(),
        threshold,
        nlat: template.grid.nlat,
        nlon: template.grid.nlon,
        lat: template.grid.lat.clone(),
        lon: template.grid.lon.clone(),
        pos_composite: build(Phase::Positive),
        neg_composite: build(Phase::Negative),
        neu_composite: build(Phase::Neutral),
        pos_months,
        neg_months,
        neu_months,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, Grid};
    use crate::time::{TimeAxis, YearMonth};

    #[test]
    fn classification_boundaries() {
        assert_eq!(Phase::classify(2.0, 2.0), Some(Phase::Positive));
        assert_eq!(Phase::classify(-2.0, 2.0), Some(Phase::Negative));
        assert_eq!(Phase::classify(1.99, 2.0), Some(Phase::Neutral));
        assert_eq!(Phase::classify(f64::NAN, 2.0), None);
    }

    #[test]
    fn composites_follow_index_phase() {
        let axis = TimeAxis::new(YearMonth::new(1920, 1), 20);
        // One strong positive event in March, one negative in May.
        let mut idx = vec![0.0f32; 20];
        idx[2] = 10.0;
        idx[4] = -10.0;
        let index = EnsembleSeries::new("PDO", vec!["001".into()], axis, vec![idx.clone()]).unwrap();
        let g = Grid::regular(&[0.0], &[0.0, 1.0]);
        let data: Vec<f32> = idx.iter().flat_map(|&v| [v * 0.5, f32::NAN]).collect();
        let f = Field::new("SST", axis, g, 1, data).unwrap();
        let res = EnsembleField::new(vec!["001".into()], vec![f]).unwrap();

        let c = composite(&index, &res).unwrap();
        assert_eq!(c.pos_composite[0], 5.0);
        assert_eq!(c.neg_composite[0], -5.0);
        assert_eq!(c.neu_composite[0], 0.0);
        assert!(c.pos_composite[1].is_nan());
        assert_eq!(c.pos_months[2], 1);
        assert_eq!(c.neg_months[4], 1);
        assert_eq!(c.neu_months.iter().sum::<usize>(), 18);
    }

    #[test]
    fn canary_has_no_domain() {
        let axis = TimeAxis::new(YearMonth::new(1920, 1), 1);
        let f = Field::filled("SST", axis, Grid::regular(&[0.0], &[0.0]), 0.0);
        let ens = EnsembleField::new(vec!["001".into()], vec![f]).unwrap();
        assert!(matches!(crop_to_domain(&ens, Ebus::CanCS), Err(Error::UnknownRegion(_))));
    }
}
