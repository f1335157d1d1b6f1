//! Lag/smoothing-aware regressions against climate indices.
//!
//!   regional EBUS VARX VARY LAG SMOOTH   AW residuals of every member vs an index
//!   box BOX VARX VARY LAG SMOOTH         CalCS sub-box residuals vs an index,
//!                                        with effective-sample-size p-values
//!   overhead EBUS VARX ENS LAG SMOOTH    index vs every regional FG_CO2 gridcell
//!   global VARY GLOBAL_VAR LAG ENS SMOOTH
//!                                        every global gridcell vs an index or
//!                                        a regional FG_ALT_CO2 series
//!
//! `NPGO` comes from the per-member EOF output; any other index from the
//! CVDP tables. `AMOC` is annual, so the predictand is resampled to match.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ebus_core::eof::NpgoResult;
use ebus_core::paths::{self, Product, OVERHEAD_PREDICTAND};
use ebus_core::regression::{regress_map, regress_members, Direction, Significance};
use ebus_core::{io, Ebus, EnsembleField, EnsembleSeries, ProjectLayout, Series, SubBox, TimeAxis};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Smoothing applied when the global subcommand's flag is set.
const GLOBAL_SMOOTH_MONTHS: usize = 12;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "correlate", about = "Regress EBUS residuals against climate indices")]
struct Cli {
    /// Project layout JSON (defaults otherwise).
    #[arg(long, global = true)]
    layout: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Area-weighted regional residuals of every member against an index.
    Regional { ebus: String, varx: String, vary: String, lag: usize, smooth: usize },
    /// CalCS onshore/offshore box residuals against an index.
    Box { r#box: String, varx: String, vary: String, lag: usize, smooth: usize },
    /// Index against each regional FG_CO2 residual gridcell of one member.
    Overhead { ebus: String, varx: String, ens: String, lag: usize, smooth: usize },
    /// Each global residual gridcell against an index or a regional flux.
    Global {
        vary: String,
        global_var: String,
        lag: usize,
        ens: String,
        /// `True` smooths both sides over 12 months.
        #[arg(action = clap::ArgAction::Set, value_parser = parse_flag)]
        smooth: bool,
    },
}

fn parse_flag(s: &str) -> std::result::Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(format!("expected True or False, got {s}")),
    }
}

// ── Predictors ────────────────────────────────────────────────────────────────

fn is_annual(index: &str) -> bool {
    index == "AMOC"
}

/// Annual CVDP indices arrive with one slot per year; count those slots as
/// calendar years from the first.
fn index_axis(index: &str, time: TimeAxis) -> TimeAxis {
    if is_annual(index) && !time.is_annual() {
        TimeAxis::annual(time.start.year, time.len)
    } else {
        time
    }
}

/// A climate index for every member.
fn load_index(layout: &ProjectLayout, index: &str) -> Result<EnsembleSeries> {
    if index == "NPGO" {
        let mut rows = Vec::with_capacity(layout.members.len());
        let mut time = None;
        for m in &layout.members {
            let path = paths::npgo(layout, m);
            let r: NpgoResult = io::load(&path).with_context(|| format!("loading {}", path.display()))?;
            time.get_or_insert(r.pc.time);
            rows.push(r.pc.values);
        }
        let time = time.unwrap_or_else(|| layout.window());
        return Ok(EnsembleSeries::new(index, layout.members.clone(), time, rows)?);
    }
    let path = paths::cvdp_index(layout, index);
    let mut table: EnsembleSeries = io::load(&path).with_context(|| format!("loading {}", path.display()))?;
    table.name = index.to_string();
    table.relabel_time(index_axis(index, table.time))?;
    Ok(table)
}

/// A climate index for one member.
fn load_index_member(layout: &ProjectLayout, index: &str, ens: &str) -> Result<Series> {
    if index == "NPGO" {
        let path = paths::npgo(layout, ens);
        let r: NpgoResult = io::load(&path).with_context(|| format!("loading {}", path.display()))?;
        let mut pc = r.pc;
        pc.name = index.to_string();
        return Ok(pc);
    }
    let path = paths::cvdp_index(layout, index);
    let table: EnsembleSeries = io::load(&path).with_context(|| format!("loading {}", path.display()))?;
    let mut s = table.member(ens)?.clone();
    s.name = index.to_string();
    s.time = index_axis(index, s.time);
    Ok(s)
}

fn match_resolution(index: &str, y: EnsembleSeries) -> EnsembleSeries {
    if is_annual(index) {
        info!("Resampling {} to annual means for {index}", y.name);
        y.resample_annual()
    } else {
        y
    }
}

fn save<T: serde::Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    io::save(path, value).with_context(|| format!("writing {}", path.display()))?;
    info!("Saved {}", path.display());
    Ok(path.to_path_buf())
}

// ── Pipelines ─────────────────────────────────────────────────────────────────

fn regional(layout: &ProjectLayout, ebus: Ebus, varx: &str, vary: &str, lag: usize, smooth: usize) -> Result<PathBuf> {
    info!("Working on {varx} regressions over the {ebus} with {lag} mo. lag and {smooth} mo. smoothing...");
    let x = load_index(layout, varx)?;
    let path = paths::regional_filtered(layout, ebus, vary, Product::Residuals, true);
    let y: EnsembleSeries = io::load(&path).with_context(|| format!("loading {}", path.display()))?;
    let y = match_resolution(varx, y);
    let table = regress_members(&x, &y, lag, smooth, Significance::Ordinary)?;
    save(&paths::area_weighted_regression(layout, ebus, varx, vary, smooth, lag), &table)
}

fn subbox(layout: &ProjectLayout, sub: SubBox, varx: &str, vary: &str, lag: usize, smooth: usize) -> Result<PathBuf> {
    info!("Working on {varx} regressions in the {sub} region of the CalCS with {lag} mo. lag and {smooth} mo. smoothing...");
    let x = load_index(layout, varx)?;
    let path = paths::subbox(layout, vary, sub, Product::Residuals);
    let y: EnsembleSeries = io::load(&path).with_context(|| format!("loading {}", path.display()))?;
    let y = match_resolution(varx, y);
    let table = regress_members(&x, &y, lag, smooth, Significance::EffectiveSampleSize)?;
    save(&paths::box_regression(layout, sub, varx, vary, smooth, lag), &table)
}

fn overhead(layout: &ProjectLayout, ebus: Ebus, varx: &str, ens: &str, lag: usize, smooth: usize) -> Result<PathBuf> {
    info!("Working on {varx} regressions for simulation {ens} over the {ebus}...");
    let x = load_index_member(layout, varx, ens)?;
    let path = paths::regional_filtered(layout, ebus, OVERHEAD_PREDICTAND, Product::Residuals, false);
    let residuals: EnsembleField = io::load(&path).with_context(|| format!("loading {}", path.display()))?;
    let Some(k) = residuals.members.iter().position(|m| m == ens) else {
        bail!("member {ens} missing from {}", path.display());
    };
    let map = regress_map(&residuals.fields[k], &x, lag, smooth, Direction::SeriesPredicts)?;
    info!("Finished regional correlations for #{ens}");
    save(&paths::overhead_map(layout, ebus, varx, ens, smooth, lag), &map)
}

fn global(layout: &ProjectLayout, vary: &str, global_var: &str, lag: usize, ens: &str, smoothed: bool) -> Result<PathBuf> {
    info!("Working on {global_var} regressions for simulation {ens}...");
    // A region name selects its area-weighted natural CO2 flux residuals.
    let (series, alt_co2) = match vary.parse::<Ebus>() {
        Ok(ebus) => {
            let path = paths::regional_filtered(layout, ebus, "FG_ALT_CO2", Product::Residuals, true);
            let table: EnsembleSeries = io::load(&path).with_context(|| format!("loading {}", path.display()))?;
            let mut s = table.member(ens)?.clone();
            s.name = vary.to_string();
            (s, true)
        }
        Err(_) => (load_index_member(layout, vary, ens)?, false),
    };

    let path = paths::global_residual(layout, global_var, ens);
    let field = io::load_field(&path, global_var).with_context(|| format!("loading {}", path.display()))?;
    let smooth = if smoothed { GLOBAL_SMOOTH_MONTHS } else { 0 };
    let map = regress_map(&field, &series, lag, smooth, Direction::FieldPredicts)?;
    info!("Finished global correlations for #{ens}");
    save(&paths::global_map(layout, global_var, vary, ens, smoothed, lag, alt_co2), &map)
}

fn run(command: &Command, layout: &ProjectLayout) -> Result<PathBuf> {
    match command {
        Command::Regional { ebus, varx, vary, lag, smooth } => {
            regional(layout, ebus.parse()?, varx, vary, *lag, *smooth)
        }
        Command::Box { r#box, varx, vary, lag, smooth } => subbox(layout, r#box.parse()?, varx, vary, *lag, *smooth),
        Command::Overhead { ebus, varx, ens, lag, smooth } => {
            let ens = layout.resolve_member(ens)?;
            overhead(layout, ebus.parse()?, varx, &ens, *lag, *smooth)
        }
        Command::Global { vary, global_var, lag, ens, smooth } => {
            let ens = layout.resolve_member(ens)?;
            global(layout, vary, global_var, *lag, &ens, *smooth)
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let layout = ProjectLayout::load(cli.layout.as_deref()).context("loading project layout")?;
    run(&cli.command, &layout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ebus_core::regression::{RegressionMap, RegressionTable};
    use ebus_core::{Field, Grid, TimeAxis, YearMonth};

    fn layout(root: &Path) -> ProjectLayout {
        ProjectLayout {
            root: root.to_path_buf(),
            members: vec!["001".into(), "002".into()],
            window_start: YearMonth::new(1920, 1),
            window_end: YearMonth::new(1922, 12),
            ..Default::default()
        }
    }

    fn wave(t: usize, k: usize) -> f32 {
        ((t as f32) * 0.7 + k as f32).sin() + 0.1 * t as f32
    }

    /// Index table whose member k follows `wave(t, k)`.
    fn index_table(l: &ProjectLayout, name: &str) -> EnsembleSeries {
        let axis = l.window();
        let rows = (0..2).map(|k| (0..axis.len).map(|t| wave(t, k)).collect()).collect();
        EnsembleSeries::new(name, l.members.clone(), axis, rows).unwrap()
    }

    fn scaled(src: &EnsembleSeries, name: &str, k: f32) -> EnsembleSeries {
        let rows = src.data.iter().map(|s| s.values.iter().map(|v| k * v).collect()).collect();
        EnsembleSeries::new(name, src.members.clone(), src.time, rows).unwrap()
    }

    #[test]
    fn test_regional_against_cvdp_index() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let pdo = index_table(&l, "pdo");
        io::save(&paths::cvdp_index(&l, "PDO"), &pdo).unwrap();
        let y = scaled(&pdo, "FG_ALT_CO2_AW", 2.0);
        io::save(&paths::regional_filtered(&l, Ebus::CalCS, "FG_ALT_CO2", Product::Residuals, true), &y).unwrap();

        let cmd = Command::Regional {
            ebus: "CalCS".into(),
            varx: "PDO".into(),
            vary: "FG_ALT_CO2".into(),
            lag: 0,
            smooth: 0,
        };
        let out = run(&cmd, &l).unwrap();
        assert!(out.ends_with("PDO.FG_ALT_CO2.CalCS.unsmoothed.area_weighted_regional_regression.lag0.json"));
        let table: RegressionTable = io::load(&out).unwrap();
        assert_eq!(table.predictor, "PDO");
        for (m, r) in table.m.iter().zip(&table.r) {
            assert_relative_eq!(*m, 2.0, epsilon = 1e-4);
            assert_relative_eq!(*r, 1.0, epsilon = 1e-4);
        }
        assert!(table.n_eff.is_none());
    }

    fn save_npgo(l: &ProjectLayout) {
        let axis = l.window();
        for (k, m) in l.members.iter().enumerate() {
            let pc = Series::new("pc", axis, (0..axis.len).map(|t| wave(t, k)).collect()).unwrap();
            let r = NpgoResult {
                member: m.clone(),
                lat: vec![],
                lon: vec![],
                eof: vec![],
                pc,
                variance_fraction: 0.2,
                description: String::new(),
            };
            io::save(&paths::npgo(l, m), &r).unwrap();
        }
    }

    #[test]
    fn test_box_uses_npgo_and_effective_sample_size() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        save_npgo(&l);
        let y = scaled(&index_table(&l, "x"), "SST", -1.0);
        io::save(&paths::subbox(&l, "SST", SubBox::Offshore, Product::Residuals), &y).unwrap();

        let cmd = Command::Box {
            r#box: "offshore".into(),
            varx: "NPGO".into(),
            vary: "SST".into(),
            lag: 2,
            smooth: 3,
        };
        let table: RegressionTable = io::load(&run(&cmd, &l).unwrap()).unwrap();
        assert_eq!(table.smooth, 3);
        assert_eq!(table.n_eff.as_ref().map(Vec::len), Some(2));
        // Lagged by two months the relation is no longer exact.
        assert!(table.m.iter().all(|m| m.is_finite()));
    }

    #[test]
    fn test_annual_index_resamples_predictand() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        // One slot per year for 1919-1922, stored without a yearly step.
        let slots = TimeAxis::new(YearMonth::new(1919, 1), 4);
        let amoc = EnsembleSeries::new(
            "amoc",
            l.members.clone(),
            slots,
            vec![vec![7.0, 1.0, 2.0, 4.0], vec![-5.0, 0.0, 3.0, 1.0]],
        )
        .unwrap();
        io::save(&paths::cvdp_index(&l, "AMOC"), &amoc).unwrap();
        // Monthly predictand for 1920-1922, constant within each year at 3x
        // that year's index.
        let rows = amoc
            .data
            .iter()
            .map(|s| (0..36).map(|t| 3.0 * s.values[t / 12 + 1]).collect())
            .collect();
        let y = EnsembleSeries::new("SST_AW", l.members.clone(), l.window(), rows).unwrap();
        io::save(&paths::regional_filtered(&l, Ebus::HumCS, "SST", Product::Residuals, true), &y).unwrap();

        let out = regional(&l, Ebus::HumCS, "AMOC", "SST", 0, 0).unwrap();
        let table: RegressionTable = io::load(&out).unwrap();
        assert_relative_eq!(table.m[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(table.m[1], 3.0, epsilon = 1e-4);
    }

    fn strip(l: &ProjectLayout, name: &str, cell: impl Fn(usize) -> [f32; 2]) -> Field {
        let axis = l.window();
        let data = (0..axis.len).flat_map(|t| cell(t)).collect();
        Field::new(name, axis, Grid::regular(&[35.0], &[235.0, 236.0]), 1, data).unwrap()
    }

    #[test]
    fn test_overhead_maps_one_member() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let pdo = index_table(&l, "pdo");
        io::save(&paths::cvdp_index(&l, "PDO"), &pdo).unwrap();
        let fields = (0..2)
            .map(|k| strip(&l, "FG_CO2", |t| [3.0 * wave(t, k), f32::NAN]))
            .collect();
        let ens = EnsembleField::new(l.members.clone(), fields).unwrap();
        io::save(&paths::regional_filtered(&l, Ebus::CalCS, "FG_CO2", Product::Residuals, false), &ens).unwrap();

        // Zero-based index 1 resolves to member 002.
        let cmd = Command::Overhead { ebus: "CalCS".into(), varx: "PDO".into(), ens: "1".into(), lag: 0, smooth: 0 };
        let out = run(&cmd, &l).unwrap();
        assert!(out.ends_with("regional_regressions/CalCS/PDO/lag0/PDO.FG_CO2.CalCS.002.unsmoothed_regional_regression.lag0.json"));
        let map: RegressionMap = io::load(&out).unwrap();
        assert_eq!(map.direction, Direction::SeriesPredicts);
        assert_relative_eq!(map.m[0], 3.0, epsilon = 1e-4);
        assert!(map.m[1].is_nan());
    }

    #[test]
    fn test_global_against_regional_flux() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let flux = scaled(&index_table(&l, "x"), "FG_ALT_CO2_AW", 1.0);
        io::save(&paths::regional_filtered(&l, Ebus::CalCS, "FG_ALT_CO2", Product::Residuals, true), &flux).unwrap();
        // Gridcell is twice the regional flux, so flux = 0.5 * cell.
        let field = strip(&l, "SST", |t| [2.0 * wave(t, 0), 1.0]);
        io::save_field(&paths::global_residual(&l, "SST", "001"), &field).unwrap();

        let cmd = Command::Global {
            vary: "CalCS".into(),
            global_var: "SST".into(),
            lag: 0,
            ens: "001".into(),
            smooth: true,
        };
        let out = run(&cmd, &l).unwrap();
        assert!(out.ends_with("SST.FG_ALT_CO2.CalCS.001.smoothed_global_regression.lag0.json"));
        let map: RegressionMap = io::load(&out).unwrap();
        assert_eq!(map.smooth, 12);
        assert_relative_eq!(map.m[0], 0.5, epsilon = 1e-4);
        // A constant cell has no slope.
        assert!(map.m[1].is_nan());
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!(parse_flag("True"), Ok(true));
        assert_eq!(parse_flag("false"), Ok(false));
        assert!(parse_flag("yes please").is_err());
    }
}
