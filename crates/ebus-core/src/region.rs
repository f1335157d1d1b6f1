//! Eastern Boundary Upwelling System definitions.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The four major upwelling systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ebus {
    /// California Current.
    CalCS,
    /// Benguela Current.
    BenCS,
    /// Canary Current.
    CanCS,
    /// Humboldt Current.
    HumCS,
}

/// Latitude/longitude box in degrees. Longitudes are 0..360 except for the
/// Benguela, which is expressed on a -180..180 grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lat1: f64,
    pub lat2: f64,
    pub lon1: f64,
    pub lon2: f64,
}

impl Ebus {
    pub const ALL: [Ebus; 4] = [Ebus::CalCS, Ebus::BenCS, Ebus::CanCS, Ebus::HumCS];

    pub fn code(self) -> &'static str {
        match self {
            Ebus::CalCS => "CalCS",
            Ebus::BenCS => "BenCS",
            Ebus::CanCS => "CanCS",
            Ebus::HumCS => "HumCS",
        }
    }

    /// Box used to cut the system out of a global field.
    pub fn extraction_bounds(self) -> Bounds {
        match self {
            Ebus::CalCS => Bounds { lat1: 25.0, lat2: 46.0, lon1: 215.0, lon2: 260.0 },
            Ebus::BenCS => Bounds { lat1: -30.0, lat2: -16.0, lon1: 0.0, lon2: 20.0 },
            Ebus::CanCS => Bounds { lat1: 19.0, lat2: 33.0, lon1: 330.0, lon2: 359.0 },
            Ebus::HumCS => Bounds { lat1: -20.0, lat2: 0.0, lon1: 260.0, lon2: 290.0 },
        }
    }

    /// The equal-size 10° latitude bands of Chavez & Messié (2009).
    pub fn chavez_bounds(self) -> (f64, f64) {
        match self {
            Ebus::CalCS => (34.0, 44.0),
            Ebus::CanCS => (21.0, 31.0),
            Ebus::BenCS => (-28.0, -18.0),
            Ebus::HumCS => (-16.0, -6.0),
        }
    }

    /// Whether the region crosses the prime meridian and needs a -180..180 grid.
    pub fn needs_wrapped_longitude(self) -> bool {
        matches!(self, Ebus::BenCS)
    }

    /// Large-scale domain for composite maps on the regular 1° grid.
    pub fn composite_domain(self) -> Result<Bounds> {
        match self {
            Ebus::CalCS => Ok(Bounds { lat1: -10.0, lat2: 60.0, lon1: 145.0, lon2: 260.0 }),
            Ebus::HumCS => Ok(Bounds { lat1: -60.0, lat2: 15.0, lon1: 180.0, lon2: 300.0 }),
            other => Err(Error::UnknownRegion(format!(
                "{other} (no composite domain defined)"
            ))),
        }
    }

    /// Plot colour.
    pub fn colour(self) -> &'static str {
        match self {
            Ebus::CalCS => "#80b1d3",
            Ebus::HumCS => "#fb8072",
            Ebus::CanCS => "#fdb462",
            Ebus::BenCS => "#bc80bd",
        }
    }
}

impl fmt::Display for Ebus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Ebus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ebus::ALL
            .into_iter()
            .find(|e| e.code() == s)
            .ok_or_else(|| Error::UnknownRegion(s.to_string()))
    }
}

/// Onshore/offshore sub-boxes of the California Current, as POP index
/// ranges into the extracted CalCS grid (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubBox {
    Onshore,
    Offshore,
}

impl SubBox {
    pub fn name(self) -> &'static str {
        match self {
            SubBox::Onshore => "onshore",
            SubBox::Offshore => "offshore",
        }
    }

    /// `(nlon0, nlon1, nlat0, nlat1)`, inclusive.
    pub fn indices(self) -> (usize, usize, usize, usize) {
        match self {
            SubBox::Offshore => (13, 15, 27, 30),
            SubBox::Onshore => (18, 20, 22, 25),
        }
    }
}

impl fmt::Display for SubBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SubBox {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onshore" => Ok(SubBox::Onshore),
            "offshore" => Ok(SubBox::Offshore),
            _ => Err(Error::UnknownBox(s.to_string())),
        }
    }
}
