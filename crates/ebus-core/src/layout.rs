//! Project layout: where data lives and which members and months to use.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::time::{TimeAxis, YearMonth};

/// Environment variable that overrides [`ProjectLayout::root`].
pub const ROOT_ENV: &str = "EBUS_DATA_ROOT";

/// The 34 CESM-LE members with ocean biogeochemistry.
pub fn default_members() -> Vec<String> {
    [1, 2]
        .into_iter()
        .chain(9..=35)
        .chain(101..=105)
        .map(|n| format!("{n:03}"))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectLayout {
    /// Directory every conventional path is resolved against.
    pub root: PathBuf,
    pub members: Vec<String>,
    /// First and last month of the analysis window.
    pub window_start: YearMonth,
    pub window_end: YearMonth,
    /// First and last month of raw model output.
    pub raw_start: YearMonth,
    pub raw_end: YearMonth,
    /// Offshore extent of the regional filter.
    pub offshore_km: f64,
    /// File extension of outputs (`json`, or `nc` with the netcdf feature).
    pub extension: String,
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            members: default_members(),
            window_start: YearMonth::new(1920, 1),
            window_end: YearMonth::new(2015, 12),
            raw_start: YearMonth::new(1920, 1),
            raw_end: YearMonth::new(2100, 12),
            offshore_km: 800.0,
            extension: "json".into(),
        }
    }
}

impl ProjectLayout {
    /// Defaults, or the JSON file at `path`; `EBUS_DATA_ROOT` then
    /// overrides the root.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut layout = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                serde_json::from_str(&text)?
            }
            None => Self::default(),
        };
        if let Ok(root) = std::env::var(ROOT_ENV) {
            layout.root = PathBuf::from(root);
        }
        layout.validate()?;
        debug!(root = %layout.root.display(), members = layout.members.len(), "project layout");
        Ok(layout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(Error::InsufficientData("layout lists no ensemble members".into()));
        }
        if self.window_start > self.window_end || self.raw_start > self.raw_end {
            return Err(Error::InsufficientData("layout time window is reversed".into()));
        }
        if self.window_start < self.raw_start || self.window_end > self.raw_end {
            return Err(Error::InsufficientData(format!(
                "analysis window {}..{} lies outside raw output {}..{}",
                self.window_start, self.window_end, self.raw_start, self.raw_end
            )));
        }
        if self.offshore_km.is_nan() || self.offshore_km <= 0.0 {
            return Err(Error::InsufficientData("offshore_km must be positive".into()));
        }
        Ok(())
    }

    /// Axis stamped onto raw member files on load.
    pub fn raw_axis(&self) -> TimeAxis {
        TimeAxis::spanning(self.raw_start, self.raw_end)
    }

    pub fn window(&self) -> TimeAxis {
        TimeAxis::spanning(self.window_start, self.window_end)
    }

    /// Member id from either an id (`"009"`) or a zero-based index (`"2"`).
    /// Ids win when a string is both.
    pub fn resolve_member(&self, arg: &str) -> Result<String> {
        if self.members.iter().any(|m| m == arg) {
            return Ok(arg.to_string());
        }
        arg.parse::<usize>()
            .ok()
            .and_then(|i| self.members.get(i).cloned())
            .ok_or_else(|| Error::UnknownMember(arg.to_string()))
    }
}
