//! Forced signal and residual products over the whole ensemble.
//!
//!   mean VAR OUTDIR       global ensemble mean, 1920-2015
//!   residuals VAR OUTDIR  one global residual file per member
//!   regional EBUS VAR     offshore-filtered forced signal and residuals,
//!                         gridded and area-weighted, for an upwelling system
//!   subbox VAR BOX        area-weighted forced signal and residuals of a
//!                         CalCS onshore/offshore box

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ebus_core::paths::{self, Product};
use ebus_core::residuals::{regional_filter, subbox_products};
use ebus_core::{io, Ebus, EnsembleField, ProjectLayout, SubBox};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ensemble", about = "Ensemble mean and residual products")]
struct Cli {
    /// Project layout JSON (defaults otherwise).
    #[arg(long, global = true)]
    layout: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Global ensemble mean over the analysis window.
    Mean { var: String, outdir: PathBuf },
    /// Global residuals (member minus ensemble mean) for every member.
    Residuals { var: String, outdir: PathBuf },
    /// Offshore-filtered regional forced signal and residuals.
    Regional { ebus: String, var: String },
    /// Area-weighted CalCS sub-box forced signal and residuals.
    Subbox { var: String, r#box: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Every raw global member, relabelled and cut to the analysis window.
fn load_raw_window(layout: &ProjectLayout, var: &str) -> Result<EnsembleField> {
    let mut ens = io::load_members(&layout.members, var, |m| paths::raw_member(layout, var, m))
        .with_context(|| format!("loading raw {var} members"))?;
    let raw = layout.raw_axis();
    for f in ens.fields.iter_mut() {
        f.relabel_time(raw)?;
        *f = f.slice_time(layout.window_start, layout.window_end)?;
    }
    Ok(ens)
}

fn load_extracted(layout: &ProjectLayout, var: &str, ebus: Ebus) -> Result<EnsembleField> {
    io::load_members(&layout.members, var, |m| paths::extracted(layout, var, m, ebus))
        .with_context(|| format!("loading extracted {var} members for {ebus}"))
}

fn save<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    io::save(path, value).with_context(|| format!("writing {}", path.display()))
}

// ── Pipelines ─────────────────────────────────────────────────────────────────

fn ensemble_mean(layout: &ProjectLayout, var: &str, outdir: &Path) -> Result<PathBuf> {
    info!("Creating ensemble mean for {var}...");
    let mean = load_raw_window(layout, var)?.mean();
    let out = outdir.join(paths::ensemble_mean_name(layout, var));
    io::save_field(&out, &mean).with_context(|| format!("writing {}", out.display()))?;
    Ok(out)
}

fn global_residuals(layout: &ProjectLayout, var: &str, outdir: &Path) -> Result<Vec<PathBuf>> {
    info!("Creating global residuals for {var}...");
    let residuals = load_raw_window(layout, var)?.residuals();
    let mut written = Vec::with_capacity(residuals.members.len());
    for (m, f) in residuals.members.iter().zip(&residuals.fields) {
        let out = outdir.join(paths::global_residual_name(layout, var, m));
        io::save_field(&out, f).with_context(|| format!("writing {}", out.display()))?;
        info!("Saved ensemble number {m}");
        written.push(out);
    }
    Ok(written)
}

fn regional(layout: &ProjectLayout, ebus: Ebus, var: &str) -> Result<()> {
    info!("Filtering {var} over the {ebus} within {} km of the coast...", layout.offshore_km);
    let ens = load_extracted(layout, var, ebus)?;
    let p = regional_filter(&ens, ebus, layout.offshore_km)?;

    let forced = paths::regional_filtered(layout, ebus, var, Product::ForcedSignal, false);
    io::save_field(&forced, &p.forced).with_context(|| format!("writing {}", forced.display()))?;
    save(&paths::regional_filtered(layout, ebus, var, Product::ForcedSignal, true), &p.forced_aw)?;
    save(&paths::regional_filtered(layout, ebus, var, Product::Residuals, false), &p.residuals)?;
    save(&paths::regional_filtered(layout, ebus, var, Product::Residuals, true), &p.residuals_aw)?;
    info!(kept_cells = p.kept_cells, "regional products written");
    Ok(())
}

fn subbox(layout: &ProjectLayout, var: &str, sub: SubBox) -> Result<()> {
    info!("Creating {sub} CalCS box series for {var}...");
    let ens = load_extracted(layout, var, Ebus::CalCS)?;
    let (forced, residuals) = subbox_products(&ens, sub)?;
    save(&paths::subbox(layout, var, sub, Product::ForcedSignal), &forced)?;
    save(&paths::subbox(layout, var, sub, Product::Residuals), &residuals)?;
    Ok(())
}

fn run(command: &Command, layout: &ProjectLayout) -> Result<()> {
    match command {
        Command::Mean { var, outdir } => {
            ensemble_mean(layout, var, outdir)?;
        }
        Command::Residuals { var, outdir } => {
            global_residuals(layout, var, outdir)?;
        }
        Command::Regional { ebus, var } => regional(layout, ebus.parse()?, var)?,
        Command::Subbox { var, r#box } => subbox(layout, var, r#box.parse()?)?,
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let layout = ProjectLayout::load(cli.layout.as_deref()).context("loading project layout")?;
    run(&cli.command, &layout)
}
