//! Regional extraction of one ensemble member.
//! Reads a global monthly file `{VAR}.{ENS}.192001-210012.*`, stamps the raw
//! 1920-2100 axis onto it, keeps the analysis window, converts CO2 flux and
//! area units, and cuts out the requested upwelling system.
//! Output: OUTDIR/{VAR}.{ENS}.{EBUS}.192001-201512.*

use anyhow::{Context, Result};
use clap::Parser;
use ebus_core::derive::normalize_units;
use ebus_core::grid::extract_region;
use ebus_core::{io, paths, Ebus, ProjectLayout};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "extract", about = "Cut an upwelling system out of a global ensemble member")]
struct Args {
    /// Global member file, named `{VAR}.{ENS}.192001-210012.*`.
    input: PathBuf,

    /// Variable to extract (e.g. FG_CO2).
    var: String,

    /// Upwelling system: CalCS, CanCS, BenCS or HumCS.
    ebus: String,

    /// Directory for the extracted file.
    outdir: PathBuf,

    /// Project layout JSON (defaults otherwise).
    #[arg(long)]
    layout: Option<PathBuf>,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

fn run(args: &Args, layout: &ProjectLayout) -> Result<PathBuf> {
    let ebus: Ebus = args.ebus.parse()?;
    let ens = paths::member_id_from_name(&args.input)?;
    info!("Extracting {} for {} from member {}...", args.var, ebus, ens);

    let mut field = io::load_field(&args.input, &args.var)
        .with_context(|| format!("loading {}", args.input.display()))?;
    field.relabel_time(layout.raw_axis())?;
    let field = field.slice_time(layout.window_start, layout.window_end)?;
    let mut region = extract_region(&field, ebus)?;
    normalize_units(&mut region);

    let out = args.outdir.join(paths::extracted_name(layout, &args.var, &ens, ebus));
    io::save_field(&out, &region).with_context(|| format!("writing {}", out.display()))?;
    info!(nlat = region.grid.nlat, nlon = region.grid.nlon, "wrote {}", out.display());
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
