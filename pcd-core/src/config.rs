use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Parameters of one classification job. Immutable once the job starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Tile edge length in length units.
    pub tile_size: f64,
    /// Worker thread count.
    pub threads: usize,
    /// Lowest acceptable goodness of fit of a ground patch, 0..=1.
    pub min_smoothness: f64,
    /// Steepest acceptable ground slope, in degrees.
    pub max_slope: f64,
    /// Vertical tolerance band around the ground surface, in length units.
    pub thickness: f64,
    /// Points per output file; `None` is unlimited.
    pub points_per_file: Option<usize>,
    /// Refine nonground points into vegetation/structure classes.
    pub separate_classes: bool,
    /// Margin of neighbouring points read (never written) around each tile.
    pub overlap: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            tile_size: 10.0,
            threads: num_cpus::get().max(1),
            min_smoothness: 0.5,
            max_slope: 30.0,
            thickness: 0.1,
            points_per_file: None,
            separate_classes: false,
            overlap: 0.0,
        }
    }
}

impl ClassificationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tile_size.is_finite() && self.tile_size > 0.0) {
            return Err(ConfigError::TileSize(self.tile_size));
        }
        if self.threads == 0 {
            return Err(ConfigError::Threads(self.threads));
        }
        if !(self.min_smoothness.is_finite() && self.min_smoothness >= 0.0) {
            return Err(ConfigError::MinSmoothness(self.min_smoothness));
        }
        if !(self.max_slope.is_finite() && (0.0..90.0).contains(&self.max_slope)) {
            return Err(ConfigError::MaxSlope(self.max_slope));
        }
        if !(self.thickness.is_finite() && self.thickness >= 0.0) {
            return Err(ConfigError::Thickness(self.thickness));
        }
        if !(self.overlap.is_finite() && self.overlap >= 0.0) {
            return Err(ConfigError::Overlap(self.overlap));
        }
        if let Some(0) = self.points_per_file {
            return Err(ConfigError::PointsPerFile(0));
        }
        Ok(())
    }

    /// Maximum slope expressed as rise over run.
    pub fn max_slope_tangent(&self) -> f64 {
        self.max_slope.to_radians().tan()
    }
}
