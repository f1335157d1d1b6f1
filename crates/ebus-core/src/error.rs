use thiserror::Error;

/// Errors raised by the EBUS processing library.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    /// Region code outside the four supported upwelling systems.
    #[error("unknown EBUS '{0}'; must select from: CalCS, CanCS, BenCS, HumCS")]
    UnknownRegion(String),

    #[error("unknown sub-box '{0}'; expected 'onshore' or 'offshore'")]
    UnknownBox(String),

    #[error("unknown ensemble member '{0}'")]
    UnknownMember(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("missing variable: {0}")]
    MissingVariable(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("NetCDF support not enabled (rebuild with --features netcdf): {0}")]
    FeatureDisabled(String),
}

pub type Result<T> = std::result::Result<T, Error>;
