//! File naming conventions.
//!
//! Every product is located purely by its name: variable, region, member,
//! lag and smoothing are encoded in the path and nothing else records them.
//! All functions resolve against [`ProjectLayout::root`]. Single-member
//! gridded fields take the layout's file extension; tables, ensembles and
//! statistics are always JSON.
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::layout::ProjectLayout;
use crate::region::{Ebus, SubBox};
use crate::time::YearMonth;

/// Observational flux product relabelled from this month.
pub const OBS_START: YearMonth = YearMonth::new(1982, 1);

/// The variable whose regional residuals the overhead maps regress.
pub const OVERHEAD_PREDICTAND: &str = "FG_CO2";

/// Which half of a forced/residual split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    Residuals,
    ForcedSignal,
}

impl Product {
    pub fn label(self) -> &'static str {
        match self {
            Product::Residuals => "residuals",
            Product::ForcedSignal => "forced-signal",
        }
    }
}

fn stamp(a: YearMonth, b: YearMonth) -> String {
    format!("{:04}{:02}-{:04}{:02}", a.year, a.month, b.year, b.month)
}

fn window_stamp(l: &ProjectLayout) -> String {
    stamp(l.window_start, l.window_end)
}

fn raw_stamp(l: &ProjectLayout) -> String {
    stamp(l.raw_start, l.raw_end)
}

fn file(l: &ProjectLayout, stem: String) -> String {
    format!("{stem}.{}", l.extension)
}

fn json(stem: String) -> String {
    format!("{stem}.json")
}

/// `smoothed{N}` or `unsmoothed`.
pub fn smoothing_tag(smooth: usize) -> String {
    if smooth > 1 { format!("smoothed{smooth}") } else { "unsmoothed".into() }
}

// ── Model output ──────────────────────────────────────────────────────────────

/// Raw monthly member output, `{VAR}_monthly/{VAR}.{ENS}.192001-210012.*`.
pub fn raw_member(l: &ProjectLayout, var: &str, ens: &str) -> PathBuf {
    l.root
        .join(format!("{var}_monthly"))
        .join(file(l, format!("{var}.{ens}.{}", raw_stamp(l))))
}

/// Member id from a `{VAR}.{ENS}.{stamp}.*` file name.
pub fn member_id_from_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::UnknownMember(path.display().to_string()))?;
    let mut parts = name.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(ens), Some(_)) if !ens.is_empty() && ens.chars().all(|c| c.is_ascii_digit()) => {
            Ok(ens.to_string())
        }
        _ => Err(Error::UnknownMember(name.to_string())),
    }
}

/// Upper-ocean (top 100 m) member output.
pub fn upper_ocean_member(l: &ProjectLayout, var: &str, ens: &str) -> PathBuf {
    l.root
        .join(format!("{var}100m_monthly"))
        .join(file(l, format!("{var}.{ens}.{}", raw_stamp(l))))
}

pub fn integrated(l: &ProjectLayout, var: &str, ens: &str) -> PathBuf {
    l.root
        .join(format!("{var}_int100m_monthly"))
        .join(file(l, format!("{var}_int100m.{ens}.{}", raw_stamp(l))))
}

pub fn tendency(l: &ProjectLayout, var: &str, ens: &str) -> PathBuf {
    l.root
        .join(format!("{var}_tendency"))
        .join(file(l, format!("{var}_tendency.{ens}.{}", raw_stamp(l))))
}

/// Member reconstructed from forced signal and residual.
pub fn reconstructed(l: &ProjectLayout, var: &str, ens: &str) -> PathBuf {
    l.root
        .join(format!("{var}_monthly"))
        .join(file(l, format!("{var}.{ens}.{}", window_stamp(l))))
}

// ── Extraction and residuals ──────────────────────────────────────────────────

pub fn extracted_name(l: &ProjectLayout, var: &str, ens: &str, ebus: Ebus) -> String {
    file(l, format!("{var}.{ens}.{ebus}.{}", window_stamp(l)))
}

/// Extracted (or derived) regional member, `{VAR}/{EBUS}/{VAR}.{ENS}.{EBUS}.192001-201512.*`.
pub fn extracted(l: &ProjectLayout, var: &str, ens: &str, ebus: Ebus) -> PathBuf {
    l.root.join(var).join(ebus.code()).join(extracted_name(l, var, ens, ebus))
}

pub fn global_residual_name(l: &ProjectLayout, var: &str, ens: &str) -> String {
    file(l, format!("{var}.{ens}.global_residuals"))
}

pub fn global_residual(l: &ProjectLayout, var: &str, ens: &str) -> PathBuf {
    l.root
        .join("global_residuals")
        .join(var)
        .join(global_residual_name(l, var, ens))
}

/// Global residual regridded to a regular lat/lon grid.
pub fn remapped_residual(l: &ProjectLayout, var: &str, ens: &str) -> PathBuf {
    l.root
        .join("global_residuals")
        .join(var)
        .join("remapped")
        .join(file(l, format!("remapped.{var}.{ens}.{}", window_stamp(l))))
}

pub fn ensemble_mean_name(l: &ProjectLayout, var: &str) -> String {
    file(l, format!("{var}.global_ensemble_mean.{}", window_stamp(l)))
}

pub fn ensemble_mean(l: &ProjectLayout, var: &str) -> PathBuf {
    l.root.join("global_mean").join(ensemble_mean_name(l, var))
}

/// `{VAR}/{EBUS}/filtered_output/{ebus}-{VAR}-{product}[-AW]-chavez-{KM}km.*`
pub fn regional_filtered(l: &ProjectLayout, ebus: Ebus, var: &str, product: Product, area_weighted: bool) -> PathBuf {
    let aw = if area_weighted { "-AW" } else { "" };
    let name = format!(
        "{}-{var}-{}{aw}-chavez-{}km",
        ebus.code().to_lowercase(),
        product.label(),
        l.offshore_km
    );
    // Only the gridded forced signal is a single field.
    let name = if product == Product::ForcedSignal && !area_weighted { file(l, name) } else { json(name) };
    l.root.join(var).join(ebus.code()).join("filtered_output").join(name)
}

pub fn subbox(l: &ProjectLayout, var: &str, sub: SubBox, product: Product) -> PathBuf {
    l.root
        .join("CalCS_Boxes")
        .join(sub.name())
        .join(var)
        .join(json(format!("CalCS.{var}.{sub}.{}", product.label())))
}

// ── Regressions ───────────────────────────────────────────────────────────────

pub fn area_weighted_regression(l: &ProjectLayout, ebus: Ebus, x: &str, y: &str, smooth: usize, lag: usize) -> PathBuf {
    l.root
        .join("area_weighted_regional_regressions")
        .join(ebus.code())
        .join(y)
        .join(x)
        .join(json(format!(
            "{x}.{y}.{ebus}.{}.area_weighted_regional_regression.lag{lag}",
            smoothing_tag(smooth)
        )))
}

pub fn box_regression(l: &ProjectLayout, sub: SubBox, x: &str, y: &str, smooth: usize, lag: usize) -> PathBuf {
    l.root
        .join("CalCS_Boxes")
        .join(sub.name())
        .join("regression_results")
        .join(y)
        .join(x)
        .join(json(format!("{x}.{y}.{sub}.{}.regression.lag{lag}", smoothing_tag(smooth))))
}

pub fn overhead_map(l: &ProjectLayout, ebus: Ebus, x: &str, ens: &str, smooth: usize, lag: usize) -> PathBuf {
    l.root
        .join("regional_regressions")
        .join(ebus.code())
        .join(x)
        .join(format!("lag{lag}"))
        .join(json(format!(
            "{x}.{OVERHEAD_PREDICTAND}.{ebus}.{ens}.{}_regional_regression.lag{lag}",
            smoothing_tag(smooth)
        )))
}

/// Global map name; `alt_co2` inserts `.FG_ALT_CO2` when the series is
/// a regional flux rather than a climate index.
pub fn global_map(
    l: &ProjectLayout,
    global_var: &str,
    y: &str,
    ens: &str,
    smoothed: bool,
    lag: usize,
    alt_co2: bool,
) -> PathBuf {
    let alt = if alt_co2 { ".FG_ALT_CO2" } else { "" };
    let sm = if smoothed { "smoothed" } else { "unsmoothed" };
    l.root
        .join("global_regressions")
        .join(global_var)
        .join(y)
        .join(format!("lag{lag}"))
        .join(json(format!("{global_var}{alt}.{y}.{ens}.{sm}_global_regression.lag{lag}")))
}

// ── Indices and summaries ─────────────────────────────────────────────────────

pub fn npgo(l: &ProjectLayout, ens: &str) -> PathBuf {
    l.root
        .join("NPGO")
        .join(json(format!("NPGO.{ens}.{}-{}", l.window_start.year, l.window_end.year)))
}

/// CVDP index table for every member, `cesmLE_CVDP/{index}.*` (lower case).
pub fn cvdp_index(l: &ProjectLayout, index: &str) -> PathBuf {
    l.root.join("cesmLE_CVDP").join(json(index.to_lowercase()))
}

/// Composite of `var` residuals on `mode`,
/// `composites/{EBUS}/{VAR}/{VAR}.residuals.composite.{MODE}.json`.
///
/// Earlier outputs were named `{VAR}.residuals.FG_CO2.composite.{VAR}.{MODE}.nc`;
/// the flux tag and repeated variable are dropped here.
pub fn composite(l: &ProjectLayout, ebus: Ebus, var: &str, mode: &str) -> PathBuf {
    l.root
        .join("composites")
        .join(ebus.code())
        .join(var)
        .join(json(format!("{var}.residuals.composite.{mode}")))
}

pub fn variability(l: &ProjectLayout, var: &str) -> PathBuf {
    l.root.join(json(format!("global_{var}_variability")))
}

pub fn observational_anomalies_name(l: &ProjectLayout) -> String {
    file(l, format!("SOM-FFN.v2016.{}-{}.POP.residuals", OBS_START.year, l.window_end.year))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ProjectLayout {
        ProjectLayout { root: PathBuf::from("/data"), ..Default::default() }
    }

    fn s(p: PathBuf) -> String {
        p.to_string_lossy().into_owned()
    }

    #[test]
    fn smoothing_tags() {
        assert_eq!(smoothing_tag(0), "unsmoothed");
        assert_eq!(smoothing_tag(1), "unsmoothed");
        assert_eq!(smoothing_tag(6), "smoothed6");
    }

    #[test]
    fn member_files() {
        let l = layout();
        assert_eq!(s(raw_member(&l, "SST", "009")), "/data/SST_monthly/SST.009.192001-210012.json");
        assert_eq!(
            s(extracted(&l, "FG_CO2", "001", Ebus::CalCS)),
            "/data/FG_CO2/CalCS/FG_CO2.001.CalCS.192001-201512.json"
        );
        assert_eq!(
            s(global_residual(&l, "SST", "101")),
            "/data/global_residuals/SST/SST.101.global_residuals.json"
        );
        assert_eq!(
            s(ensemble_mean(&l, "SST")),
            "/data/global_mean/SST.global_ensemble_mean.192001-201512.json"
        );
        assert_eq!(
            s(integrated(&l, "DIC", "002")),
            "/data/DIC_int100m_monthly/DIC_int100m.002.192001-210012.json"
        );
    }

    #[test]
    fn member_ids_parse_from_names() {
        assert_eq!(member_id_from_name(Path::new("/x/SST.034.192001-210012.nc")).unwrap(), "034");
        assert!(member_id_from_name(Path::new("SST.nc")).is_err());
        assert!(member_id_from_name(Path::new("SST.abc.192001.nc")).is_err());
    }

    #[test]
    fn regional_products() {
        let l = layout();
        assert_eq!(
            s(regional_filtered(&l, Ebus::HumCS, "SST", Product::Residuals, true)),
            "/data/SST/HumCS/filtered_output/humcs-SST-residuals-AW-chavez-800km.json"
        );
        assert_eq!(
            s(regional_filtered(&l, Ebus::CalCS, "FG_CO2", Product::ForcedSignal, false)),
            "/data/FG_CO2/CalCS/filtered_output/calcs-FG_CO2-forced-signal-chavez-800km.json"
        );
        assert_eq!(
            s(subbox(&l, "SST", SubBox::Onshore, Product::Residuals)),
            "/data/CalCS_Boxes/onshore/SST/CalCS.SST.onshore.residuals.json"
        );
    }

    #[test]
    fn regression_outputs() {
        let l = layout();
        assert_eq!(
            s(area_weighted_regression(&l, Ebus::CalCS, "NPGO", "FG_CO2", 12, 2)),
            "/data/area_weighted_regional_regressions/CalCS/FG_CO2/NPGO/NPGO.FG_CO2.CalCS.smoothed12.area_weighted_regional_regression.lag2.json"
        );
        assert_eq!(
            s(box_regression(&l, SubBox::Offshore, "PDO", "SST", 0, 0)),
            "/data/CalCS_Boxes/offshore/regression_results/SST/PDO/PDO.SST.offshore.unsmoothed.regression.lag0.json"
        );
        assert_eq!(
            s(overhead_map(&l, Ebus::CanCS, "AMO", "009", 0, 1)),
            "/data/regional_regressions/CanCS/AMO/lag1/AMO.FG_CO2.CanCS.009.unsmoothed_regional_regression.lag1.json"
        );
        assert_eq!(
            s(global_map(&l, "SST", "CalCS", "001", true, 3, true)),
            "/data/global_regressions/SST/CalCS/lag3/SST.FG_ALT_CO2.CalCS.001.smoothed_global_regression.lag3.json"
        );
    }

    #[test]
    fn index_and_summary_files() {
        let mut l = layout();
        assert_eq!(s(npgo(&l, "001")), "/data/NPGO/NPGO.001.1920-2015.json");
        assert_eq!(s(cvdp_index(&l, "PDO")), "/data/cesmLE_CVDP/pdo.json");
        assert_eq!(
            s(composite(&l, Ebus::CalCS, "SST", "NPGO")),
            "/data/composites/CalCS/SST/SST.residuals.composite.NPGO.json"
        );
        l.extension = "nc".into();
        assert_eq!(s(variability(&l, "FG_CO2")), "/data/global_FG_CO2_variability.json");
        assert_eq!(
            s(regional_filtered(&l, Ebus::CalCS, "SST", Product::ForcedSignal, false)),
            "/data/SST/CalCS/filtered_output/calcs-SST-forced-signal-chavez-800km.nc"
        );
        assert_eq!(
            s(regional_filtered(&l, Ebus::CalCS, "SST", Product::Residuals, false)),
            "/data/SST/CalCS/filtered_output/calcs-SST-residuals-chavez-800km.json"
        );
        assert_eq!(observational_anomalies_name(&l), "SOM-FFN.v2016.1982-2015.POP.residuals.nc");
    }
}
