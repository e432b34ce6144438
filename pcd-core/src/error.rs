use thiserror::Error;

/// A configuration value was rejected before any work began.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("tile size must be a positive length, got {0}")]
    TileSize(f64),
    #[error("thread count must be at least 1, got {0}")]
    Threads(usize),
    #[error("minimum smoothness must be non-negative, got {0}")]
    MinSmoothness(f64),
    #[error("maximum slope must be between 0 and 90 degrees, got {0}")]
    MaxSlope(f64),
    #[error("thickness must be non-negative, got {0}")]
    Thickness(f64),
    #[error("tile overlap must be non-negative, got {0}")]
    Overlap(f64),
    #[error("points per file must be at least 1 (or unlimited), got {0}")]
    PointsPerFile(usize),
    #[error("sub-classification threshold {name} is out of range, got {value}")]
    Threshold { name: &'static str, value: f64 },
    #[error("a classification job is already active")]
    JobActive,
}

/// A point record produced by a loader is structurally invalid.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("point {index} has a non-finite coordinate ({x}, {y}, {z})")]
    NonFiniteCoordinate { index: usize, x: f64, y: f64, z: f64 },
    #[error("record {index}: {message}")]
    Record { index: usize, message: String },
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("unsupported input: {0}")]
    Unsupported(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
