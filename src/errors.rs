use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Custom error types for lung morphometry
#[derive(Error, Debug)]
pub enum LungError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unreadable image {path}: {source}")]
    UnreadableImage {
        source: image::ImageError,
        path: PathBuf,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Raster dimensions differ: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("Measurement error: {0}")]
    Measurement(#[from] MeasurementError),

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),
}

/// Statistics that cannot be computed for a given labeled raster.
///
/// These never abort an image: the affected columns are written as NaN.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementError {
    #[error("no airspace runs found; mean linear intercept is undefined")]
    EmptyInterceptPool,

    #[error("image contains no tissue; expansion index is undefined")]
    NoTissue,

    #[error("no airspaces detected")]
    NoObjects,
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, LungError>;
