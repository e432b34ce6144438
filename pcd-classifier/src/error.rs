use thiserror::Error;

use pcd_core::error::ConfigError;

use crate::scheduler::JobPhase;

/// Surface fitting failed for a whole tile. Local to that tile.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TileFitError {
    #[error("surface fit produced a non-finite value")]
    NonFinite,
    #[error("no surface can be fitted to {points} degenerate points")]
    Degenerate { points: usize },
    #[error("tile classification panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot {action} while the job is {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: JobPhase,
    },
    #[error("the point store is held by a running job")]
    StoreBusy,
    #[error("no classification job has been started")]
    NoJob,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
