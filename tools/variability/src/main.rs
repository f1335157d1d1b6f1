//! Variability summaries.
//!
//!   magnitudes VAR          seasonal (forced) and internal (residual)
//!                           magnitudes at every global gridcell, 1920-2015
//!   anomalies INPUT OUTDIR  detrended, deseasonalised anomalies of the
//!                           SOM-FFN observational flux product on the POP grid

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ebus_core::paths::OBS_START;
use ebus_core::variability::{magnitudes, observational_anomalies};
use ebus_core::{io, paths, ProjectLayout, TimeAxis};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Variable holding the regridded observational flux.
const OBS_VARIABLE: &str = "fgco2_raw";

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "variability", about = "Seasonal and internal variability magnitudes")]
struct Cli {
    /// Project layout JSON (defaults otherwise).
    #[arg(long, global = true)]
    layout: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seasonal and internal magnitudes of a global variable.
    Magnitudes { var: String },
    /// Residuals of the observational flux product.
    Anomalies { input: PathBuf, outdir: PathBuf },
}

// ── Pipelines ─────────────────────────────────────────────────────────────────

fn global_magnitudes(layout: &ProjectLayout, var: &str) -> Result<PathBuf> {
    info!("Computing seasonal and internal magnitudes for {var}...");
    let mut ens = io::load_members(&layout.members, var, |m| paths::raw_member(layout, var, m))
        .with_context(|| format!("loading raw {var} members"))?;
    for f in ens.fields.iter_mut() {
        f.relabel_time(layout.raw_axis())?;
        *f = f.slice_time(layout.window_start, layout.window_end)?;
    }
    let maps = magnitudes(&ens);
    let out = paths::variability(layout, var);
    io::save(&out, &maps).with_context(|| format!("writing {}", out.display()))?;
    Ok(out)
}

fn obs_anomalies(layout: &ProjectLayout, input: &Path, outdir: &Path) -> Result<PathBuf> {
    info!("Removing trend and seasonal cycle from {}", input.display());
    let mut field = io::load_field(input, OBS_VARIABLE).with_context(|| format!("loading {}", input.display()))?;
    field.relabel_time(TimeAxis::new(OBS_START, field.time.len))?;
    let anomalies = observational_anomalies(&field)?;
    let out = outdir.join(paths::observational_anomalies_name(layout));
    io::save_field(&out, &anomalies).with_context(|| format!("writing {}", out.display()))?;
    Ok(out)
}

fn run(command: &Command, layout: &ProjectLayout) -> Result<PathBuf> {
    match command {
        Command::Magnitudes { var } => global_magnitudes(layout, var),
        Command::Anomalies { input, outdir } => obs_anomalies(layout, input, outdir),
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
    use ebus_core::variability::VariabilityMaps;
    use ebus_core::{Field, Grid, YearMonth};

    fn layout(root: &Path) -> ProjectLayout {
        ProjectLayout {
            root: root.to_path_buf(),
            members: vec!["001".into(), "002".into()],
            raw_start: YearMonth::new(1920, 1),
            raw_end: YearMonth::new(1924, 12),
            window_start: YearMonth::new(1920, 1),
            window_end: YearMonth::new(1923, 12),
            ..Default::default()
        }
    }

    fn seasonal(t: usize) -> f32 {
        (2.0 * std::f64::consts::PI * (t % 12) as f64 / 12.0).sin() as f32
    }

    #[test]
    fn test_magnitudes_over_window() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let g = Grid::regular(&[0.0], &[0.0]);
        for (m, sign) in l.members.iter().zip([1.0f32, -1.0]) {
            // The last (out-of-window) year is wild and must be dropped.
            let data = (0..60)
                .map(|t| if t >= 48 { 100.0 * sign } else { 2.0 * seasonal(t) + sign * 0.5 })
                .collect();
            let f = Field::new("SST", l.raw_axis(), g.clone(), 1, data).unwrap();
            io::save_field(&paths::raw_member(&l, "SST", m), &f).unwrap();
        }

        let out = run(&Command::Magnitudes { var: "SST".into() }, &l).unwrap();
        assert!(out.ends_with("global_SST_variability.json"));
        let v: VariabilityMaps = io::load(&out).unwrap();
        assert_relative_eq!(v.s_magnitude[0], 4.0, epsilon = 1e-5);
        // Residuals are a constant ±0.5, so no spread over time.
        assert_relative_eq!(v.r_magnitude[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_observational_anomalies() {
        let dir = tempfile::tempdir().unwrap();
        let l = ProjectLayout { root: dir.path().to_path_buf(), ..Default::default() };
        let n = 48;
        let g = Grid::regular(&[0.0], &[0.0, 1.0]);
        let data = (0..n)
            .flat_map(|t| {
                let x = t as f32 / n as f32;
                [0.5 + x - x * x, if t == 3 { f32::NAN } else { 2.0 }]
            })
            .collect();
        let f = Field::new(OBS_VARIABLE, TimeAxis::new(YearMonth::new(1, 1), n), g, 1, data).unwrap();
        let input = dir.path().join("fgco2_raw.json");
        io::save_field(&input, &f).unwrap();

        let out = run(&Command::Anomalies { input, outdir: dir.path().join("obs") }, &l).unwrap();
        assert!(out.ends_with("SOM-FFN.v2016.1982-2015.POP.residuals.json"));
        let a = io::load_field(&out, OBS_VARIABLE).unwrap();
        assert_eq!(a.time.start, OBS_START);
        assert!(a.get(10, 0, 0).abs() < 1e-4);
        assert!(a.get(10, 0, 1).is_nan());
    }
}
