//! Derived variables for one ensemble member.
//!
//!   ant-co2 ENS EBUS          FG_ANT_CO2 = FG_CO2 - FG_ALT_CO2
//!   normalize VAR ENS EBUS    s{VAR} = VAR / SALT * 35
//!   integrate VAR ENS         upper 100 m column sum, {VAR}_int100m
//!   tendency ENS              time derivative of salinity-normalised DIC_int100m
//!   wind ENS EBUS             10 m wind speed U from TAUX/TAUY
//!   reconstruct VAR ENS       ensemble mean + global residual

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ebus_core::derive::{anthropogenic_flux, integrate_levels, salinity_normalize, tendency, wind_speed_from_stress};
use ebus_core::residuals::reconstruct;
use ebus_core::{io, paths, Ebus, Field, ProjectLayout};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "derive", about = "Build derived variables for one member")]
struct Cli {
    /// Project layout JSON (defaults otherwise).
    #[arg(long, global = true)]
    layout: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Anthropogenic CO2 flux over an upwelling system.
    AntCo2 { ens: String, ebus: String },
    /// Salinity-normalised variable over an upwelling system.
    Normalize { var: String, ens: String, ebus: String },
    /// Integrate a global upper-ocean field over its depth levels.
    Integrate { var: String, ens: String },
    /// Tendency of salinity-normalised upper-ocean DIC.
    Tendency { ens: String },
    /// Wind speed from surface stress over an upwelling system.
    Wind { ens: String, ebus: String },
    /// Rebuild a full field from the ensemble mean and a member's residual.
    Reconstruct { var: String, ens: String },
}

// ── Pipelines ─────────────────────────────────────────────────────────────────

fn load(path: &Path, var: &str) -> Result<Field> {
    io::load_field(path, var).with_context(|| format!("loading {}", path.display()))
}

fn store(path: PathBuf, field: &Field) -> Result<PathBuf> {
    io::save_field(&path, field).with_context(|| format!("writing {}", path.display()))?;
    info!("Saved {}", path.display());
    Ok(path)
}

fn ant_co2(layout: &ProjectLayout, ens: &str, ebus: Ebus) -> Result<PathBuf> {
    info!("Creating FG_ANT_CO2 for member {ens} over the {ebus}...");
    let con = load(&paths::extracted(layout, "FG_CO2", ens, ebus), "FG_CO2")?;
    let nat = load(&paths::extracted(layout, "FG_ALT_CO2", ens, ebus), "FG_ALT_CO2")?;
    let ant = anthropogenic_flux(&con, &nat)?;
    store(paths::extracted(layout, &ant.name, ens, ebus), &ant)
}

fn normalize(layout: &ProjectLayout, var: &str, ens: &str, ebus: Ebus) -> Result<PathBuf> {
    info!("Salinity-normalising {var} for member {ens} over the {ebus}...");
    let v = load(&paths::extracted(layout, var, ens, ebus), var)?;
    let salt = load(&paths::extracted(layout, "SALT", ens, ebus), "SALT")?;
    let s = salinity_normalize(&v, &salt)?;
    store(paths::extracted(layout, &s.name, ens, ebus), &s)
}

fn integrate(layout: &ProjectLayout, var: &str, ens: &str) -> Result<PathBuf> {
    info!("Integrating {var} over the upper 100 m for member {ens}...");
    let mut field = load(&paths::upper_ocean_member(layout, var, ens), var)?;
    field.relabel_time(layout.raw_axis())?;
    let integrated = integrate_levels(&field);
    store(paths::integrated(layout, var, ens), &integrated)
}

fn dic_tendency(layout: &ProjectLayout, ens: &str) -> Result<PathBuf> {
    info!("Creating sDIC_int100m tendency for member {ens}...");
    let dic = load(&paths::integrated(layout, "DIC", ens), "DIC_int100m")?;
    let salt = load(&paths::integrated(layout, "SALT", ens), "SALT_int100m")?;
    let sdic = salinity_normalize(&dic, &salt)?;
    let out = tendency(&sdic)?;
    store(paths::tendency(layout, &sdic.name, ens), &out)
}

fn wind(layout: &ProjectLayout, ens: &str, ebus: Ebus) -> Result<PathBuf> {
    info!("Converting wind stress to U for member {ens} over the {ebus}...");
    let taux = load(&paths::extracted(layout, "TAUX", ens, ebus), "TAUX")?;
    let tauy = load(&paths::extracted(layout, "TAUY", ens, ebus), "TAUY")?;
    let u = wind_speed_from_stress(&taux, &tauy)?;
    store(paths::extracted(layout, &u.name, ens, ebus), &u)
}

fn rebuild(layout: &ProjectLayout, var: &str, ens: &str) -> Result<PathBuf> {
    info!("Reconstructing {var} for member {ens}...");
    let mean = load(&paths::ensemble_mean(layout, var), var)?;
    let residual = load(&paths::global_residual(layout, var, ens), var)?;
    let full = reconstruct(&mean, &residual)?;
    store(paths::reconstructed(layout, var, ens), &full)
}

fn run(command: &Command, layout: &ProjectLayout) -> Result<PathBuf> {
    match command {
        Command::AntCo2 { ens, ebus } => ant_co2(layout, &layout.resolve_member(ens)?, ebus.parse()?),
        Command::Normalize { var, ens, ebus } => normalize(layout, var, &layout.resolve_member(ens)?, ebus.parse()?),
        Command::Integrate { var, ens } => integrate(layout, var, &layout.resolve_member(ens)?),
        Command::Tendency { ens } => dic_tendency(layout, &layout.resolve_member(ens)?),
        Command::Wind { ens, ebus } => wind(layout, &layout.resolve_member(ens)?, ebus.parse()?),
        Command::Reconstruct { var, ens } => rebuild(layout, var, &layout.resolve_member(ens)?),
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
