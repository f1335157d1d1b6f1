//! Seasonal and internal variability magnitudes, and anomalies of the
//! gridded observational flux product.
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::field::{nan_as_null_f64, EnsembleField, Field};
use crate::par::map_cells;
use crate::stats::{remove_polynomial_fit, remove_seasonal_cycle, seasonal_magnitude, to_f64};

/// Polynomial order of the observational detrend.
pub const OBS_DETREND_ORDER: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariabilityMaps {
    pub variable: String,
    pub nlat: usize,
    pub nlon: usize,
    #[serde(with = "nan_as_null_f64")]
    pub lat: Vec<f64>,
    #[serde(with = "nan_as_null_f64")]
    pub lon: Vec<f64>,
    /// Peak-to-trough amplitude of the forced seasonal cycle.
    #[serde(with = "nan_as_null_f64")]
    pub s_magnitude: Vec<f64>,
    /// Mean over members of the residual time standard deviation.
    #[serde(with = "nan_as_null_f64")]
    pub r_magnitude: Vec<f64>,
}

/// Seasonal and internal magnitudes over every surface cell of an ensemble.
pub fn magnitudes(ensemble: &EnsembleField) -> VariabilityMaps {
    let forced = ensemble.mean();
    let axis = forced.time;
    let s_magnitude = map_cells(forced.grid.cells(), |c| {
        seasonal_magnitude(&to_f64(&forced.series_at_cell(c)), &axis)
    });
    let r_magnitude = ensemble.residuals().std_over_time_mean_members();
    let grid = &forced.grid;
    info!(variable = %forced.name, cells = grid.cells(), "computed variability magnitudes");
    VariabilityMaps {
        variable: forced.name.clone(),
        nlat: grid.nlat,
        nlon: grid.nlon,
        lat: grid.lat.clone(),
        lon: grid.lon.clone(),
        s_magnitude,
        r_magnitude,
    }
}

/// Residuals of an observational product: 4th-order polynomial detrend,
/// then removal of the monthly climatology, per cell. Cells with any gap
/// come back entirely NaN.
pub fn observational_anomalies(field: &Field) -> Result<Field> {
    let axis = field.time;
    let per_cell = map_cells(field.grid.cells(), |c| -> Result<Vec<f32>> {
        let x = to_f64(&field.series_at_cell(c));
        let detrended = remove_polynomial_fit(&x, OBS_DETREND_ORDER)?;
        if detrended.iter().any(|v| v.is_nan()) {
            return Ok(vec![f32::NAN; x.len()]);
        }
        Ok(remove_seasonal_cycle(&detrended, &axis)
            .into_iter()
            .map(|v| v as f32)
            .collect())
    })
    .into_iter()
    .collect::<Result<Vec<_>>>()?;
    let mut out = Field::from_cell_series(field.name.clone(), axis, field.grid.clone(), &per_cell)?;
    out.units = field.units.clone();
    out.attrs = field.attrs.clone();
    out.attrs.insert(
        "description".into(),
        "4th-order polynomial detrend and monthly climatology removed".into(),
    );
    Ok(out)
}
