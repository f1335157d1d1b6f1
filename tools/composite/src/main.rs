//! Climate-mode composites of residual maps around an upwelling system.
//! Classifies each member-month of a CVDP index as positive (≥ 2σ),
//! negative (≤ -2σ) or neutral, then averages the member's residual map
//! over each class.
//! Output: composites/{EBUS}/{VAR}/{VAR}.residuals.composite.{MODE}.json

use anyhow::{Context, Result};
use clap::Parser;
use ebus_core::composite::{composite, crop_to_domain};
use ebus_core::{io, paths, Ebus, EnsembleSeries, ProjectLayout};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "composite", about = "Composite residual maps on a climate mode")]
struct Args {
    /// Upwelling system whose domain is mapped (CalCS or HumCS).
    ebus: String,

    /// CVDP climate mode (e.g. NINO34, PDO).
    mode: String,

    /// Residual variable to composite.
    var: String,

    /// Project layout JSON (defaults otherwise).
    #[arg(long)]
    layout: Option<PathBuf>,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Wind stress curl residuals are already on a regular grid.
fn residual_path(layout: &ProjectLayout, var: &str, ens: &str) -> PathBuf {
    if var == "curl" {
        paths::global_residual(layout, var, ens)
    } else {
        paths::remapped_residual(layout, var, ens)
    }
}

fn run(args: &Args, layout: &ProjectLayout) -> Result<PathBuf> {
    let ebus: Ebus = args.ebus.parse()?;
    // Fails early for systems without a composite domain.
    ebus.composite_domain()?;
    info!("Compositing {} residuals on {} over the {ebus}...", args.var, args.mode);

    let index_path = paths::cvdp_index(layout, &args.mode);
    let index: EnsembleSeries =
        io::load(&index_path).with_context(|| format!("loading {}", index_path.display()))?;

    let mut residuals = io::load_members(&layout.members, &args.var, |m| residual_path(layout, &args.var, m))
        .with_context(|| format!("loading {} residuals", args.var))?;
    for f in residuals.fields.iter_mut() {
        f.relabel_time(layout.window())?;
    }
    let cropped = crop_to_domain(&residuals, ebus)?;

    let mut result = composite(&index, &cropped)?;
    result.index = args.mode.clone();
    info!(
        threshold = result.threshold,
        positive = result.pos_months.iter().sum::<usize>(),
        negative = result.neg_months.iter().sum::<usize>(),
        "classified index months"
    );

    let out = paths::composite(layout, ebus, &args.var, &args.mode);
    io::save(&out, &result).with_context(|| format!("writing {}", out.display()))?;
    Ok(out)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let layout = ProjectLayout::load(args.layout.as_deref()).context("loading project layout")?;
    run(&args, &layout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ebus_core::composite::CompositeResult;
    use ebus_core::{Field, Grid, TimeAxis, YearMonth};

    fn layout(root: &std::path::Path) -> ProjectLayout {
        ProjectLayout {
            root: root.to_path_buf(),
            members: vec!["001".into(), "002".into()],
            window_start: YearMonth::new(1920, 1),
            window_end: YearMonth::new(1920, 12),
            ..Default::default()
        }
    }

    /// 001 spikes positive in March, 002 negative in July.
    fn save_index(l: &ProjectLayout) {
        let mut a = vec![0.0f32; 12];
        let mut b = vec![0.0f32; 12];
        a[2] = 10.0;
        b[6] = -10.0;
        let idx = EnsembleSeries::new("nino34", l.members.clone(), l.window(), vec![a, b]).unwrap();
        io::save(&paths::cvdp_index(l, "NINO34"), &idx).unwrap();
    }

    /// Residuals of 1 for member 001 and 3 for 002, on a grid reaching
    /// beyond the CalCS composite domain.
    fn save_residuals(l: &ProjectLayout, var: &str) {
        let grid = Grid::regular(&[-10.0, 25.0, 60.0, 70.0], &[145.0, 200.0, 260.0, 300.0]);
        for (m, v) in l.members.iter().zip([1.0f32, 3.0]) {
            let f = Field::filled(var, TimeAxis::new(YearMonth::new(1, 1), 12), grid.clone(), v);
            io::save_field(&residual_path(l, var, m), &f).unwrap();
        }
    }

    #[test]
    fn test_composites_by_phase() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        save_index(&l);
        save_residuals(&l, "SST");

        let args = Args { ebus: "CalCS".into(), mode: "NINO34".into(), var: "SST".into(), layout: None };
        let out = run(&args, &l).unwrap();
        assert!(out.ends_with("composites/CalCS/SST/SST.residuals.composite.NINO34.json"));

        let r: CompositeResult = io::load(&out).unwrap();
        assert_eq!((r.nlat, r.nlon), (3, 3));
        assert_eq!(r.pos_months[2], 1);
        assert_eq!(r.neg_months[6], 1);
        assert_eq!(r.neu_months.iter().sum::<usize>(), 22);
        assert_relative_eq!(r.pos_composite[0], 1.0);
        assert_relative_eq!(r.neg_composite[0], 3.0);
        assert_relative_eq!(r.neu_composite[4], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_curl_reads_native_residuals() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        save_index(&l);
        save_residuals(&l, "curl");
        assert!(residual_path(&l, "curl", "001").to_string_lossy().ends_with("curl.001.global_residuals.json"));

        let args = Args { ebus: "HumCS".into(), mode: "NINO34".into(), var: "curl".into(), layout: None };
        let r: CompositeResult = io::load(&run(&args, &l).unwrap()).unwrap();
        // The HumCS domain keeps the -10 row and the 200-300E columns.
        assert_eq!((r.nlat, r.nlon), (1, 3));
    }

    #[test]
    fn test_region_without_domain() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout(dir.path());
        let args = Args { ebus: "BenCS".into(), mode: "PDO".into(), var: "SST".into(), layout: None };
        assert!(run(&args, &l).is_err());
    }
}
