pub mod classify;
pub mod error;
pub mod scheduler;
pub mod tiler;

pub use classify::{
    subclass::{GeometricSubClassifier, SubClassifier, SubclassThresholds, TileContext},
    GroundClassifier,
};
pub use error::{JobError, TileFitError};
pub use scheduler::{
    CompletionReport, JobEvent, JobHandle, JobPhase, JobScheduler, Progress, TileFailure,
};
pub use tiler::{Bounds2D, Tile, TileGrid, Tiler};
