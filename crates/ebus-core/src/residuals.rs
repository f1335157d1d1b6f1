//! Forced signal and residual products.
//!
//! The forced signal is the ensemble mean; a residual is one member minus
//! that mean, i.e. its internal variability.
use tracing::info;

use crate::error::{Error, Result};
use crate::field::{EnsembleField, EnsembleSeries, Field, Series};
use crate::grid::offshore_mask;
use crate::region::{Ebus, SubBox};

/// Everything the regional residual pipeline writes.
#[derive(Debug, Clone)]
pub struct RegionalProducts {
    pub forced: Field,
    pub residuals: EnsembleField,
    /// Area-weighted forced signal, named `{VAR}_AW`.
    pub forced_aw: Series,
    /// Area-weighted residuals per member, named `{VAR}_AW`.
    pub residuals_aw: EnsembleSeries,
    /// Cells that survived the latitude band and offshore filter.
    pub kept_cells: usize,
}

/// Restrict an extracted ensemble to the Chavez band within `offshore_km`
/// of the coast, then split it into forced signal and residuals, both
/// gridded and area-weighted (UAREA, falling back to TAREA).
///
/// The mask comes from the first member at the first step.
pub fn regional_filter(ensemble: &EnsembleField, ebus: Ebus, offshore_km: f64) -> Result<RegionalProducts> {
    let keep = offshore_mask(ensemble.template(), ebus, offshore_km)?;
    let kept_cells = keep.iter().filter(|k| **k).count();
    if kept_cells == 0 {
        return Err(Error::InsufficientData(format!(
            "no {ebus} cells within {offshore_km} km of the coast"
        )));
    }
    info!(%ebus, kept_cells, offshore_km, "applied offshore filter");

    let mut masked = ensemble.clone();
    masked.mask_cells(&keep)?;
    let forced = masked.mean();
    let residuals = masked.residuals();

    let weights = forced.grid.weights().to_vec();
    let aw_name = format!("{}_AW", forced.name);
    let mut forced_aw = forced.area_weighted_series(&weights)?;
    forced_aw.name = aw_name.clone();
    let mut residuals_aw = residuals.area_weighted(&weights)?;
    residuals_aw.name = aw_name.clone();
    for s in residuals_aw.data.iter_mut() {
        s.name = aw_name.clone();
    }

    Ok(RegionalProducts { forced, residuals, forced_aw, residuals_aw, kept_cells })
}

/// Area-weighted (TAREA) forced signal and residuals of a CalCS sub-box.
///
/// Each member is averaged over the box first; the ensemble statistics are
/// then taken on the resulting series.
pub fn subbox_products(ensemble: &EnsembleField, sub: SubBox) -> Result<(Series, EnsembleSeries)> {
    let (nlon0, nlon1, nlat0, nlat1) = sub.indices();
    let boxed = ensemble.subset(nlat0..nlat1 + 1, nlon0..nlon1 + 1)?;
    let weights = boxed.template().grid.area.clone();
    let series = boxed.area_weighted(&weights)?;
    Ok((series.mean(), series.residuals()))
}

/// Add the forced signal back onto a residual field.
pub fn reconstruct(mean: &Field, residual: &Field) -> Result<Field> {
    residual.zip_with(mean, residual.name.clone(), |r, m| r + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Grid;
    use crate::time::{TimeAxis, YearMonth};
    use approx::assert_relative_eq;

    /// 2×5 CalCS strip: ocean west, land in the east column.
    fn member(offset: f32) -> Field {
        let mut g = Grid::regular(&[38.0, 40.0], &[230.0, 231.0, 232.0, 233.0, 234.0]);
        g.dxt = Some(vec![300.0 * 1e5; 10]);
        g.region_mask = Some(vec![2, 2, 2, 2, 0, 2, 2, 2, 2, 0]);
        g.uarea = Some(vec![1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 1.0, 1.0, 2.0, 1.0]);
        let steps = 3;
        let mut data = Vec::new();
        for t in 0..steps {
            for c in 0..10 {
                data.push(if c % 5 == 4 { f32::NAN } else { offset + t as f32 + c as f32 });
            }
        }
        Field::new("FG_CO2", TimeAxis::new(YearMonth::new(1920, 1), steps), g, 1, data).unwrap()
    }

    fn ensemble() -> EnsembleField {
        EnsembleField::new(vec!["001".into(), "002".into()], vec![member(0.0), member(2.0)]).unwrap()
    }

    #[test]
    fn regional_filter_keeps_nearshore_cells() {
        let p = regional_filter(&ensemble(), Ebus::CalCS, 800.0).unwrap();
        // Columns 2 and 3 of both rows are within 600 km.
        assert_eq!(p.kept_cells, 4);
        assert!(p.forced.get(0, 0, 0).is_nan());
        assert_eq!(p.forced.get(0, 0, 3), 4.0);
        assert_eq!(p.residuals.fields[0].get(0, 0, 3), -1.0);
        assert_eq!(p.forced_aw.name, "FG_CO2_AW");
        // Forced at t=0: cells 2,3,7,8 hold 3,4,8,9 with weights 1,2,1,2.
        let expect = (3.0 + 2.0 * 4.0 + 8.0 + 2.0 * 9.0) / 6.0;
        assert_relative_eq!(p.forced_aw.values[0] as f64, expect, epsilon = 1e-5);
        for s in &p.residuals_aw.data {
            assert_relative_eq!(s.values[0].abs(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn regional_filter_rejects_empty_domain() {
        assert!(regional_filter(&ensemble(), Ebus::CalCS, 10.0).is_err());
    }

    #[test]
    fn reconstruct_inverts_residuals() {
        let ens = ensemble();
        let mean = ens.mean();
        let res = ens.residuals();
        let back = reconstruct(&mean, &res.fields[1]).unwrap();
        assert_eq!(back.data[1], ens.fields[1].data[1]);
        assert!(back.data[4].is_nan());
    }

    #[test]
    fn subbox_requires_enough_rows() {
        assert!(matches!(subbox_products(&ensemble(), SubBox::Onshore), Err(Error::Shape(_))));
    }

    #[test]
    fn subbox_averages_then_splits() {
        let g = Grid::regular(
            &(0..32).map(|j| 30.0 + j as f64 * 0.5).collect::<Vec<_>>(),
            &(0..24).map(|i| 230.0 + i as f64 * 0.5).collect::<Vec<_>>(),
        );
        let axis = TimeAxis::new(YearMonth::new(1920, 1), 2);
        let a = Field::filled("SST", axis, g.clone(), 10.0);
        let b = Field::filled("SST", axis, g, 14.0);
        let ens = EnsembleField::new(vec!["001".into(), "002".into()], vec![a, b]).unwrap();
        let (forced, resid) = subbox_products(&ens, SubBox::Offshore).unwrap();
        assert_eq!(forced.values, vec![12.0, 12.0]);
        assert_eq!(resid.member("001").unwrap().values, vec![-2.0, -2.0]);
    }
}
