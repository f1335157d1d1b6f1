//! North Pacific Gyre Oscillation index for one ensemble member.
//! Reads the member's SST residuals remapped to a regular 1° grid, takes
//! the second EOF of Northeast Pacific JFM anomalies and projects every
//! month onto it.
//! Output: NPGO/NPGO.{ENS}.1920-2015.json

use anyhow::{Context, Result};
use clap::Parser;
use ebus_core::{eof, io, paths, ProjectLayout};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "npgo", about = "Compute the NPGO index for one ensemble member")]
struct Args {
    /// Member id (`009`) or zero-based index.
    ens: String,

    /// Project layout JSON (defaults otherwise).
    #[arg(long)]
    layout: Option<PathBuf>,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

fn run(args: &Args, layout: &ProjectLayout) -> Result<PathBuf> {
    let ens = layout.resolve_member(&args.ens)?;
    let input = paths::remapped_residual(layout, "SST", &ens);
    info!("Computing NPGO for member {ens} from {}", input.display());

    let sst = io::load_field(&input, "SST").with_context(|| format!("loading {}", input.display()))?;
    let result = eof::npgo(&sst, &ens)?;
    info!(variance_fraction = result.variance_fraction, "second mode solved");

    let out = paths::npgo(layout, &ens);
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
