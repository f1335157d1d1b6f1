//! Spatial operations on POP curvilinear and regular lat/lon grids.
use tracing::debug;

use crate::error::{Error, Result};
use crate::field::{Field, Grid};
use crate::region::{Bounds, Ebus};

/// Nearest grid cell to `(lat, lon)` by L1 distance |Δlon| + |Δlat|.
///
/// Cells with NaN coordinates are ignored. Ties go to the first cell in
/// row-major order. Returns `(row, col)`.
pub fn nearest_index(grid: &Grid, lat: f64, lon: f64) -> Result<(usize, usize)> {
    let mut best: Option<(usize, f64)> = None;
    for (c, (&la, &lo)) in grid.lat.iter().zip(&grid.lon).enumerate() {
        let d = (lo - lon).abs() + (la - lat).abs();
        if !d.is_finite() {
            continue;
        }
        match best {
            Some((_, bd)) if d >= bd => {}
            _ => best = Some((c, d)),
        }
    }
    let (c, _) = best.ok_or_else(|| Error::InsufficientData("grid has no finite coordinates".into()))?;
    Ok((c / grid.nlon, c % grid.nlon))
}

/// Cut an upwelling system out of a (global) field.
///
/// The corner cells nearest to `(lat1, lon1)` and `(lat2, lon2)` bound an
/// inclusive index block. Benguela longitudes are wrapped to -180..180
/// first so the box is contiguous across the prime meridian.
pub fn extract_region(field: &Field, ebus: Ebus) -> Result<Field> {
    let mut src = field.clone();
    if ebus.needs_wrapped_longitude() {
        src.grid.wrap_longitudes();
    }
    let b = ebus.extraction_bounds();
    let (a, c) = nearest_index(&src.grid, b.lat1, b.lon1)?;
    let (bb, d) = nearest_index(&src.grid, b.lat2, b.lon2)?;
    let rows = a.min(bb)..a.max(bb) + 1;
    let cols = c.min(d)..c.max(d) + 1;
    debug!(%ebus, ?rows, ?cols, "extracting region");
    src.subset(rows, cols)
}

/// Distance to the coast in km for every cell, measured westward from the
/// eastern edge of the domain.
///
/// DXT (cm) is converted to km and accumulated from the east. Cells where
/// `valid` is false contribute nothing and come back NaN; rows with no land
/// cell (`REGION_MASK == 0`) have no coastline to reference and are NaN
/// throughout.
pub fn coastal_distance_km(grid: &Grid, valid: &[bool]) -> Result<Vec<f64>> {
    let dxt = grid.dxt.as_ref().ok_or_else(|| Error::MissingVariable("DXT".into()))?;
    let mask = grid
        .region_mask
        .as_ref()
        .ok_or_else(|| Error::MissingVariable("REGION_MASK".into()))?;
    if valid.len() != grid.cells() {
        return Err(Error::Shape(format!(
            "validity mask has {} cells, grid has {}",
            valid.len(),
            grid.cells()
        )));
    }

    let mut out = vec![f64::NAN; grid.cells()];
    for j in 0..grid.nlat {
        let has_coast = (j * grid.nlon..(j + 1) * grid.nlon).any(|c| mask[c] == 0);
        if !has_coast {
            continue;
        }
        let mut cum = 0.0f64;
        for i in (0..grid.nlon).rev() {
            let c = grid.idx(j, i);
            let w = dxt[c] / 100.0 / 1000.0;
            if valid[c] && w.is_finite() {
                cum += w;
                out[c] = cum;
            }
        }
    }
    Ok(out)
}

/// Cells inside the Chavez latitude band, wet at the first step, and within
/// `max_km` of the coast.
pub fn offshore_mask(field: &Field, ebus: Ebus, max_km: f64) -> Result<Vec<bool>> {
    let grid = &field.grid;
    let (lat1, lat2) = ebus.chavez_bounds();
    let in_band: Vec<bool> = grid.lat.iter().map(|&la| la >= lat1 && la <= lat2).collect();
    let valid: Vec<bool> = (0..grid.cells())
        .map(|c| in_band[c] && field.data.get(c).is_some_and(|v| v.is_finite()))
        .collect();

    // Only rows inside the band may reference a coastline.
    let mut banded = grid.clone();
    if let Some(m) = banded.region_mask.as_mut() {
        for (c, v) in m.iter_mut().enumerate() {
            if !in_band[c] {
                *v = -1;
            }
        }
    }
    let dist = coastal_distance_km(&banded, &valid)?;
    Ok(valid
        .iter()
        .zip(&dist)
        .map(|(&v, &d)| v && d <= max_km)
        .collect())
}

/// Crop a regular lat/lon field to `bounds` (inclusive), assuming ascending
/// 1-D coordinates.
pub fn select_box(field: &Field, bounds: Bounds) -> Result<Field> {
    let lats = field.grid.lat_1d();
    let lons = field.grid.lon_1d();
    let rows = index_span(&lats, bounds.lat1, bounds.lat2)?;
    let cols = index_span(&lons, bounds.lon1, bounds.lon2)?;
    field.subset(rows, cols)
}

fn index_span(coords: &[f64], lo: f64, hi: f64) -> Result<std::ops::Range<usize>> {
    let first = coords.iter().position(|&x| x >= lo && x <= hi);
    let last = coords.iter().rposition(|&x| x >= lo && x <= hi);
    match (first, last) {
        (Some(a), Some(b)) => Ok(a..b + 1),
        _ => Err(Error::InsufficientData(format!(
            "no coordinates within {lo}..{hi}"
        ))),
    }
}
