//! Processing library for CESM Large Ensemble output over the Eastern
//! Boundary Upwelling Systems: regional extraction, forced signal and
//! residuals, lag/smoothing-aware regressions against climate indices,
//! the NPGO index, composites and variability magnitudes.
pub mod composite;
pub mod derive;
pub mod eof;
pub mod error;
pub mod field;
pub mod grid;
pub mod io;
pub mod layout;
mod par;
pub mod paths;
pub mod region;
pub mod regression;
pub mod residuals;
pub mod stats;
pub mod time;
pub mod variability;

pub use error::{Error, Result};
pub use field::{EnsembleField, EnsembleSeries, Field, Grid, Series};
pub use layout::ProjectLayout;
pub use region::{Ebus, SubBox};
pub use time::{TimeAxis, YearMonth};
