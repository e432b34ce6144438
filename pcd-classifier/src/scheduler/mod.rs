use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{unbounded, Receiver};

use pcd_core::{
    config::ClassificationConfig, error::ConfigError, pointcloud::store::PointStore,
};

use crate::{
    classify::{
        subclass::{GeometricSubClassifier, SubClassifier},
        GroundClassifier,
    },
    error::{JobError, TileFitError},
    tiler::{Bounds2D, Tiler},
};

mod arena;
mod job;

use arena::PointArena;
use job::{JobState, Subscribers, Worker};

pub use job::JobHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Stopped | JobPhase::Failed
        )
    }

    /// Running or paused: the job holds the points.
    pub fn is_active(self) -> bool {
        matches!(self, JobPhase::Running | JobPhase::Paused)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Idle => "idle",
            JobPhase::Running => "running",
            JobPhase::Paused => "paused",
            JobPhase::Completed => "completed",
            JobPhase::Stopped => "stopped",
            JobPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub tiles_completed: usize,
    pub tiles_failed: usize,
    pub tiles_total: usize,
    pub points_classified: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.tiles_total == 0 {
            return 1.0;
        }
        (self.tiles_completed + self.tiles_failed) as f64 / self.tiles_total as f64
    }
}

/// A tile whose classification failed; its points were reset to raw.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFailure {
    pub tile: usize,
    pub col: usize,
    pub row: usize,
    pub bounds: Bounds2D,
    pub point_count: usize,
    pub error: TileFitError,
}

impl fmt::Display for TileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tile {} (col {}, row {}, x {:.3}..{:.3}, y {:.3}..{:.3}, {} points) failed: {}",
            self.tile,
            self.col,
            self.row,
            self.bounds.min_x,
            self.bounds.max_x,
            self.bounds.min_y,
            self.bounds.max_y,
            self.point_count,
            self.error
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    TileFinished { tile: usize, points: usize },
    TileFailed(TileFailure),
    Finished { phase: JobPhase },
}

#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub phase: JobPhase,
    pub point_count: usize,
    pub tile_count: usize,
    pub tiles_completed: usize,
    pub failures: Vec<TileFailure>,
    pub points_classified: usize,
    pub elapsed: Duration,
}

struct RunningJob {
    handle: JobHandle,
    arena: Arc<PointArena>,
    workers: Vec<JoinHandle<()>>,
    started: Instant,
}

/// Owns the point store and drives classification jobs over it.
///
/// While a job runs its points live in the job; [`JobScheduler::wait`] (or any
/// call that needs the store) hands them back once the job is over.
pub struct JobScheduler {
    store: PointStore,
    sub_classifier: Arc<dyn SubClassifier>,
    subscribers: Subscribers,
    job: Option<RunningJob>,
    last_report: Option<CompletionReport>,
}

impl JobScheduler {
    pub fn new(store: PointStore) -> Self {
        Self {
            store,
            sub_classifier: Arc::new(GeometricSubClassifier::default()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            job: None,
            last_report: None,
        }
    }

    pub fn with_sub_classifier(mut self, sub_classifier: Arc<dyn SubClassifier>) -> Self {
        self.sub_classifier = sub_classifier;
        self
    }

    pub fn phase(&self) -> JobPhase {
        match (&self.job, &self.last_report) {
            (Some(job), _) => job.handle.phase(),
            (None, Some(report)) => report.phase,
            (None, None) => JobPhase::Idle,
        }
    }

    pub fn progress(&self) -> Progress {
        match (&self.job, &self.last_report) {
            (Some(job), _) => job.handle.progress(),
            (None, Some(report)) => Progress {
                tiles_completed: report.tiles_completed,
                tiles_failed: report.failures.len(),
                tiles_total: report.tile_count,
                points_classified: report.points_classified,
            },
            (None, None) => Progress::default(),
        }
    }

    /// Handle of the current job, for control from other threads.
    pub fn handle(&self) -> Option<JobHandle> {
        self.job.as_ref().map(|job| job.handle.clone())
    }

    /// Receives the events of every job started after this call, and of the current one.
    pub fn subscribe(&self) -> Receiver<JobEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    pub fn store(&mut self) -> Result<&PointStore, JobError> {
        self.settle()?;
        Ok(&self.store)
    }

    pub fn store_mut(&mut self) -> Result<&mut PointStore, JobError> {
        self.settle()?;
        Ok(&mut self.store)
    }

    pub fn into_store(mut self) -> Result<PointStore, JobError> {
        self.settle()?;
        Ok(std::mem::take(&mut self.store))
    }

    /// Stops any active job, then discards every point.
    pub fn clear(&mut self) -> Result<(), JobError> {
        if self.phase().is_active() {
            self.stop()?;
        }
        self.settle()?;
        self.store.clear();
        self.last_report = None;
        Ok(())
    }

    pub fn start(&mut self, config: &ClassificationConfig) -> Result<JobHandle, JobError> {
        if self.phase().is_active() {
            return Err(ConfigError::JobActive.into());
        }
        config.validate()?;
        self.settle()?;
        self.last_report = None;

        let start = Instant::now();
        let tiler = Tiler::new(config.tile_size)?.with_overlap(config.overlap)?;
        let points = self.store.take_points();
        let grid = Arc::new(tiler.tile(&points));
        let arena = Arc::new(PointArena::new(points));
        log::info!(
            "start classification: {} points in {} x {} tiles of {} (overlap {}), {} threads",
            arena.len(),
            grid.cols,
            grid.rows,
            grid.tile_size,
            config.overlap,
            config.threads
        );

        let state = Arc::new(JobState::new(
            grid.len(),
            config.threads,
            Arc::clone(&self.subscribers),
        ));
        let classifier = GroundClassifier::with_sub_classifier(config, Arc::clone(&self.sub_classifier));
        let handle = JobHandle {
            state: Arc::clone(&state),
        };

        let mut workers = Vec::with_capacity(config.threads);
        for i in 0..config.threads {
            let worker = Worker {
                state: Arc::clone(&state),
                arena: Arc::clone(&arena),
                grid: Arc::clone(&grid),
                classifier: classifier.clone(),
            };
            match thread::Builder::new()
                .name(format!("classify-{}", i))
                .spawn(move || worker.run())
            {
                Ok(join) => workers.push(join),
                Err(e) => {
                    log::error!("failed to spawn worker {}: {}", i, e);
                    state.abort_spawn(config.threads - i);
                    break;
                }
            }
        }

        self.job = Some(RunningJob {
            handle: handle.clone(),
            arena,
            workers,
            started: start,
        });
        Ok(handle)
    }

    pub fn pause(&self) -> Result<(), JobError> {
        self.active_handle("pause")?.pause()
    }

    pub fn resume(&self) -> Result<(), JobError> {
        self.active_handle("resume")?.resume()
    }

    pub fn stop(&self) -> Result<(), JobError> {
        self.active_handle("stop")?.stop()
    }

    fn active_handle(&self, action: &'static str) -> Result<&JobHandle, JobError> {
        match &self.job {
            Some(job) => Ok(&job.handle),
            None => Err(JobError::InvalidTransition {
                action,
                phase: self.phase(),
            }),
        }
    }

    /// Blocks until the current job is over, returns its points to the store and
    /// reports the outcome. A paused job must be resumed or stopped from another thread.
    pub fn wait(&mut self) -> Result<CompletionReport, JobError> {
        let job = self.job.take().ok_or(JobError::NoJob)?;
        let state = Arc::clone(&job.handle.state);
        job.handle.wait_until_finished();

        let mut abnormal = false;
        for worker in job.workers {
            if worker.join().is_err() {
                abnormal = true;
            }
        }
        if abnormal {
            log::error!("a classification worker terminated abnormally");
            state.mark_failed();
        }

        let points = match Arc::try_unwrap(job.arena) {
            Ok(arena) => arena.into_points(),
            Err(shared) => shared.snapshot(),
        };
        self.store.restore_points(points);

        let progress = state.progress();
        let report = CompletionReport {
            phase: state.phase(),
            point_count: self.store.point_count(),
            tile_count: progress.tiles_total,
            tiles_completed: progress.tiles_completed,
            failures: state.failures(),
            points_classified: progress.points_classified,
            elapsed: job.started.elapsed(),
        };
        log::info!(
            "finish classification ({}) in {:?}: {}/{} tiles, {} points, {} failed tiles",
            report.phase,
            report.elapsed,
            report.tiles_completed,
            report.tile_count,
            report.points_classified,
            report.failures.len()
        );
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Report of the last finished job.
    pub fn last_report(&self) -> Option<&CompletionReport> {
        self.last_report.as_ref()
    }

    /// Forgets the last finished job; the scheduler is idle again.
    pub fn reset(&mut self) -> Result<(), JobError> {
        self.settle()?;
        self.last_report = None;
        Ok(())
    }

    // Reclaims the points of a finished job; fails while one is active.
    fn settle(&mut self) -> Result<(), JobError> {
        let Some(job) = &self.job else {
            return Ok(());
        };
        if !job.handle.phase().is_terminal() {
            return Err(JobError::StoreBusy);
        }
        self.wait().map(|_| ())
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        let Some(job) = &self.job else {
            return;
        };
        if job.handle.phase().is_active() {
            let _ = job.handle.stop();
        }
        let _ = self.wait();
    }
}
