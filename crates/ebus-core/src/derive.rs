//! Derived variables built from extracted or global member fields.
use tracing::debug;

use crate::error::{Error, Result};
use crate::field::Field;
use crate::par::map_cells;
use crate::stats::gradient;

/// POP `FG_CO2` is mmol m⁻³ cm s⁻¹ positive into the ocean; this factor
/// gives sea-to-air mol m⁻² yr⁻¹.
pub const FLUX_TO_MOL_M2_YR: f64 = (-1.0 * 3600.0 * 24.0 * 365.25) / (1000.0 * 100.0);

/// Reference salinity for salinity normalisation.
pub const REFERENCE_SALINITY: f32 = 35.0;

/// Air density (kg m⁻³) in the bulk stress formula.
pub const RHO_AIR: f64 = 1.22;
/// Drag polynomial: τ = ρ (a U + b U² + c U³).
pub const DRAG_A: f64 = 0.0027;
pub const DRAG_B: f64 = 0.000142;
pub const DRAG_C: f64 = 0.0000764;

/// Whether a variable is a CO2 flux that needs unit conversion.
pub fn is_co2_flux(var: &str) -> bool {
    matches!(var, "FG_CO2" | "FG_ALT_CO2")
}

/// Unit normalisation applied at extraction: CO2 fluxes to mol m⁻² yr⁻¹
/// (sea-to-air positive) and cell areas from cm² to m².
pub fn normalize_units(field: &mut Field) {
    if is_co2_flux(&field.name) {
        field.scale(FLUX_TO_MOL_M2_YR as f32);
        field.units = Some("mol/m2/yr".into());
        field.attrs.insert("carbon flux units".into(), "mol/m2/yr".into());
    }
    field.grid.convert_area_to_m2();
    field.attrs.insert("area units".into(), "m2".into());
}

/// Anthropogenic flux: contemporary (`FG_CO2`) minus natural (`FG_ALT_CO2`).
pub fn anthropogenic_flux(fg_co2: &Field, fg_alt_co2: &Field) -> Result<Field> {
    let mut out = fg_co2.zip_with(fg_alt_co2, "FG_ANT_CO2", |c, n| c - n)?;
    out.attrs.insert("long name".into(), "anthropogenic sea-air carbon flux".into());
    Ok(out)
}

/// `var / SALT × 35`, named `s{VAR}`.
pub fn salinity_normalize(var: &Field, salt: &Field) -> Result<Field> {
    let name = format!("s{}", var.name);
    var.zip_with(salt, name, |v, s| v / s * REFERENCE_SALINITY)
}

/// Column sum over every vertical level of a (pre-sliced) upper-ocean field.
pub fn integrate_levels(field: &Field) -> Field {
    field.sum_levels(format!("{}_int100m", field.name))
}

/// Time-rate of change at every surface gridcell (central differences).
pub fn tendency(field: &Field) -> Result<Field> {
    if field.levels != 1 {
        return Err(Error::Shape(format!(
            "{}: tendency needs a surface field, got {} levels",
            field.name, field.levels
        )));
    }
    let per_cell = map_cells(field.grid.cells(), |c| {
        let s: Vec<f64> = field.series_at_cell(c).iter().map(|&v| v as f64).collect();
        gradient(&s).into_iter().map(|v| v as f32).collect::<Vec<f32>>()
    });
    let mut out = Field::from_cell_series(
        format!("{}_tendency", field.name),
        field.time,
        field.grid.clone(),
        &per_cell,
    )?;
    out.attrs = field.attrs.clone();
    out.attrs.insert(
        "description".into(),
        "time-rate of change approximated with central differences".into(),
    );
    Ok(out)
}

/// 10 m wind speed (m s⁻¹) for a stress magnitude in N m⁻².
///
/// Newton iteration on the monotone cubic, started from an upper bound
/// of the root.
pub fn stress_to_speed(tau: f64) -> f64 {
    if !tau.is_finite() {
        return f64::NAN;
    }
    if tau <= 0.0 {
        return 0.0;
    }
    let target = tau / RHO_AIR;
    let mut u = (target / DRAG_A).min((target / DRAG_C).cbrt());
    for _ in 0..50 {
        let f = DRAG_A * u + DRAG_B * u * u + DRAG_C * u * u * u - target;
        let df = DRAG_A + 2.0 * DRAG_B * u + 3.0 * DRAG_C * u * u;
        let step = f / df;
        u -= step;
        if step.abs() < 1e-12 {
            break;
        }
    }
    u
}

/// Wind speed `U` from POP `TAUX`/`TAUY` (dyn cm⁻²).
///
/// Cells with no stress at any step stay NaN (land). Isolated missing steps
/// inside an ocean cell count as zero stress.
pub fn wind_speed_from_stress(taux: &Field, tauy: &Field) -> Result<Field> {
    if taux.data.len() != tauy.data.len() || taux.levels != 1 || tauy.levels != 1 {
        return Err(Error::Shape(format!(
            "{} and {} must be matching surface fields",
            taux.name, tauy.name
        )));
    }
    let cells = taux.grid.cells();
    let per_cell = map_cells(cells, |c| {
        let x = taux.series_at_cell(c);
        let y = tauy.series_at_cell(c);
        if x.iter().all(|v| !v.is_finite()) {
            return vec![f32::NAN; x.len()];
        }
        x.iter()
            .zip(&y)
            .map(|(&a, &b)| {
                let (a, b) = if a.is_finite() && b.is_finite() { (a as f64, b as f64) } else { (0.0, 0.0) };
                // dyn cm⁻² → N m⁻²
                let tau = (a * a + b * b).sqrt() / 10.0;
                stress_to_speed(tau) as f32
            })
            .collect()
    });
    let filled = per_cell.iter().filter(|s| s.first().is_some_and(|v| v.is_finite())).count();
    debug!(cells, filled, "converted stress to wind speed");
    let mut out = Field::from_cell_series("U", taux.time, taux.grid.clone(), &per_cell)?;
    out.units = Some("m/s".into());
    Ok(out)
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

    fn field(name: &str, data: Vec<f32>) -> Field {
        let n = data.len() / 2;
        Field::new(name, axis(n), Grid::regular(&[0.0], &[0.0, 1.0]), 1, data).unwrap()
    }

    #[test]
    fn flux_conversion_factor() {
        assert_relative_eq!(FLUX_TO_MOL_M2_YR, -315.576, epsilon = 1e-9);
        let mut f = field("FG_CO2", vec![1.0, 2.0]);
        f.grid.area = vec![1e4, 2e4];
        normalize_units(&mut f);
        assert_relative_eq!(f.data[0], -315.576, epsilon = 1e-3);
        assert_eq!(f.grid.area, vec![1.0, 2.0]);

        let mut sst = field("SST", vec![1.0, 2.0]);
        normalize_units(&mut sst);
        assert_eq!(sst.data, vec![1.0, 2.0]);
    }

    #[test]
    fn anthropogenic_is_difference() {
        let con = field("FG_CO2", vec![3.0, 5.0]);
        let nat = field("FG_ALT_CO2", vec![1.0, 1.5]);
        let ant = anthropogenic_flux(&con, &nat).unwrap();
        assert_eq!(ant.name, "FG_ANT_CO2");
        assert_eq!(ant.data, vec![2.0, 3.5]);
    }

    #[test]
    fn salinity_normalisation() {
        let dic = field("DIC", vec![2000.0, 2100.0]);
        let salt = field("SALT", vec![35.0, 33.0]);
        let s = salinity_normalize(&dic, &salt).unwrap();
        assert_eq!(s.name, "sDIC");
        assert_relative_eq!(s.data[0], 2000.0, epsilon = 1e-2);
        assert_relative_eq!(s.data[1], 2100.0 / 33.0 * 35.0, epsilon = 1e-2);
    }

    #[test]
    fn tendency_is_gradient_in_time() {
        let f = field("sDIC_int100m", vec![0.0, 5.0, 1.0, 5.0, 4.0, 5.0]);
        let t = tendency(&f).unwrap();
        assert_eq!(t.name, "sDIC_int100m_tendency");
        assert_eq!(t.series_at_cell(0), vec![1.0, 2.0, 3.0]);
        assert_eq!(t.series_at_cell(1), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn speed_inverts_bulk_formula() {
        for u in [0.5, 3.0, 10.0, 25.0] {
            let tau = RHO_AIR * (DRAG_A * u + DRAG_B * u * u + DRAG_C * u * u * u);
            assert_relative_eq!(stress_to_speed(tau), u, epsilon = 1e-9);
        }
        assert_eq!(stress_to_speed(0.0), 0.0);
    }

    #[test]
    fn wind_from_stress_handles_gaps() {
        // τ for U = 10 m/s, in dyn cm⁻².
        let tau = 10.0 * RHO_AIR * (DRAG_A * 10.0 + DRAG_B * 100.0 + DRAG_C * 1000.0);
        let tx = field("TAUX", vec![tau as f32, f32::NAN, f32::NAN, f32::NAN]);
        let ty = field("TAUY", vec![0.0, f32::NAN, f32::NAN, f32::NAN]);
        let u = wind_speed_from_stress(&tx, &ty).unwrap();
        assert_relative_eq!(u.data[0], 10.0, epsilon = 1e-4);
        // Missing step in an ocean cell is zero stress.
        assert_eq!(u.data[2], 0.0);
        // Land stays NaN.
        assert!(u.data[1].is_nan() && u.data[3].is_nan());
    }

    #[test]
    fn integrate_names_output() {
        let f = Field::new("DIC", axis(1), Grid::regular(&[0.0], &[0.0]), 2, vec![1.0, 2.0]).unwrap();
        let i = integrate_levels(&f);
        assert_eq!(i.name, "DIC_int100m");
        assert_eq!(i.data, vec![3.0]);
    }
}
