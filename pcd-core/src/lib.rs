pub mod config;
pub mod error;
pub mod pointcloud;

pub use config::ClassificationConfig;
pub use error::{ConfigError, FormatError};
