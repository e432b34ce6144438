use std::{
    any::Any,
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
};

use crossbeam::channel::Sender;

use pcd_core::pointcloud::classification::Classification;

use crate::{
    classify::GroundClassifier,
    error::{JobError, TileFitError},
    tiler::TileGrid,
};

use super::{arena::PointArena, JobEvent, JobPhase, Progress, TileFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Pause,
    Stop,
}

struct Control {
    queue: VecDeque<usize>,
    command: Command,
    /// Workers currently processing a tile.
    busy: usize,
    /// Worker threads not yet exited.
    live: usize,
    phase: JobPhase,
    failed: bool,
}

pub(crate) type Subscribers = Arc<Mutex<Vec<Sender<JobEvent>>>>;

/// Dispatch state shared by the workers and every [`JobHandle`].
pub(crate) struct JobState {
    control: Mutex<Control>,
    signal: Condvar,
    cancel: AtomicBool,
    tiles_total: usize,
    tiles_completed: AtomicUsize,
    tiles_failed: AtomicUsize,
    points_classified: AtomicUsize,
    failures: Mutex<Vec<TileFailure>>,
    subscribers: Subscribers,
}

impl JobState {
    pub fn new(tiles_total: usize, workers: usize, subscribers: Subscribers) -> Self {
        Self {
            control: Mutex::new(Control {
                queue: (0..tiles_total).collect(),
                command: Command::Run,
                busy: 0,
                live: workers,
                phase: JobPhase::Running,
                failed: false,
            }),
            signal: Condvar::new(),
            cancel: AtomicBool::new(false),
            tiles_total,
            tiles_completed: AtomicUsize::new(0),
            tiles_failed: AtomicUsize::new(0),
            points_classified: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            subscribers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Control>) -> MutexGuard<'a, Control> {
        self.signal
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: JobEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    // Enters the terminal phase once the last worker is gone.
    fn finish_if_idle(&self, control: &mut Control) {
        if control.live > 0 || control.phase.is_terminal() {
            return;
        }
        control.phase = if control.failed {
            JobPhase::Failed
        } else if control.command == Command::Stop {
            JobPhase::Stopped
        } else {
            JobPhase::Completed
        };
        log::info!("classification job {}", control.phase);
        self.emit(JobEvent::Finished {
            phase: control.phase,
        });
        self.signal.notify_all();
    }

    pub fn phase(&self) -> JobPhase {
        self.lock().phase
    }

    pub fn progress(&self) -> Progress {
        Progress {
            tiles_completed: self.tiles_completed.load(Ordering::Relaxed),
            tiles_failed: self.tiles_failed.load(Ordering::Relaxed),
            tiles_total: self.tiles_total,
            points_classified: self.points_classified.load(Ordering::Relaxed),
        }
    }

    pub fn failures(&self) -> Vec<TileFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Aborts the job after `unstarted` workers could not be spawned.
    pub fn abort_spawn(&self, unstarted: usize) {
        let mut control = self.lock();
        control.live -= unstarted;
        control.failed = true;
        control.command = Command::Stop;
        control.queue.clear();
        self.cancel.store(true, Ordering::Relaxed);
        self.signal.notify_all();
        self.finish_if_idle(&mut control);
    }

    /// Marks the job failed because a worker ended abnormally.
    pub fn mark_failed(&self) {
        let mut control = self.lock();
        control.phase = JobPhase::Failed;
        self.signal.notify_all();
    }
}

/// Cloneable control surface of a running job, usable from any thread.
#[derive(Clone)]
pub struct JobHandle {
    pub(crate) state: Arc<JobState>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").finish_non_exhaustive()
    }
}

impl JobHandle {
    pub fn phase(&self) -> JobPhase {
        self.state.phase()
    }

    pub fn progress(&self) -> Progress {
        self.state.progress()
    }

    /// Stops dispatching after the in-flight tiles and blocks until every worker is idle.
    pub fn pause(&self) -> Result<(), JobError> {
        let state = &self.state;
        let mut control = state.lock();
        if control.phase != JobPhase::Running || control.command != Command::Run {
            return Err(JobError::InvalidTransition {
                action: "pause",
                phase: control.phase,
            });
        }
        control.command = Command::Pause;
        state.signal.notify_all();

        while control.busy > 0 && control.live > 0 {
            control = state.wait(control);
        }
        if control.command == Command::Pause && control.phase == JobPhase::Running {
            control.phase = JobPhase::Paused;
            log::info!("classification job paused");
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<(), JobError> {
        let state = &self.state;
        let mut control = state.lock();
        if control.phase != JobPhase::Paused {
            return Err(JobError::InvalidTransition {
                action: "resume",
                phase: control.phase,
            });
        }
        control.command = Command::Run;
        control.phase = JobPhase::Running;
        log::info!("classification job resumed");
        state.signal.notify_all();
        Ok(())
    }

    /// Drains the queue, cancels in-flight tiles and blocks until every worker exited.
    pub fn stop(&self) -> Result<(), JobError> {
        let state = &self.state;
        let mut control = state.lock();
        if !matches!(control.phase, JobPhase::Running | JobPhase::Paused) {
            return Err(JobError::InvalidTransition {
                action: "stop",
                phase: control.phase,
            });
        }
        control.command = Command::Stop;
        control.queue.clear();
        state.cancel.store(true, Ordering::Relaxed);
        state.signal.notify_all();

        while control.live > 0 {
            control = state.wait(control);
        }
        state.finish_if_idle(&mut control);
        Ok(())
    }

    /// Blocks until the job reaches a terminal phase.
    pub fn wait_until_finished(&self) -> JobPhase {
        let state = &self.state;
        let mut control = state.lock();
        while !control.phase.is_terminal() {
            control = state.wait(control);
        }
        control.phase
    }
}

/// What one worker thread needs.
pub(crate) struct Worker {
    pub state: Arc<JobState>,
    pub arena: Arc<PointArena>,
    pub grid: Arc<TileGrid>,
    pub classifier: GroundClassifier,
}

impl Worker {
    pub fn run(self) {
        let state = Arc::clone(&self.state);
        let _live = LiveGuard(&state);
        loop {
            let next = {
                let mut control = state.lock();
                loop {
                    let command = control.command;
                    match command {
                        Command::Stop => break None,
                        Command::Pause => control = state.wait(control),
                        Command::Run => {
                            if let Some(tile) = control.queue.pop_front() {
                                control.busy += 1;
                                break Some(tile);
                            }
                            break None;
                        }
                    }
                }
            };
            let Some(tile) = next else {
                break;
            };

            self.process(tile);

            let mut control = state.lock();
            control.busy -= 1;
            state.signal.notify_all();
        }
    }

    fn process(&self, tile_index: usize) {
        let state = &self.state;
        let tile = &self.grid.tiles[tile_index];
        if state.cancel.load(Ordering::Relaxed) {
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.classifier
                .classify(self.arena.points(), tile, &state.cancel)
        }))
        .unwrap_or_else(|panic| Err(TileFitError::Panicked(panic_message(panic))));

        match result {
            Ok(Some(classes)) => {
                let mut committed = 0;
                for (&index, class) in tile.points.iter().zip(classes) {
                    if state.cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    self.arena.set(index, class);
                    committed += 1;
                }
                state
                    .points_classified
                    .fetch_add(committed, Ordering::Relaxed);
                if committed == tile.points.len() {
                    state.tiles_completed.fetch_add(1, Ordering::Relaxed);
                    state.emit(JobEvent::TileFinished {
                        tile: tile_index,
                        points: committed,
                    });
                }
            }
            Ok(None) => {}
            Err(error) => {
                // A failed tile must not carry codes of an earlier job.
                for &index in &tile.points {
                    self.arena.set(index, Classification::Raw);
                }
                let failure = TileFailure {
                    tile: tile_index,
                    col: tile.col,
                    row: tile.row,
                    bounds: tile.bounds,
                    point_count: tile.points.len(),
                    error,
                };
                log::warn!("{}", failure);
                state.tiles_failed.fetch_add(1, Ordering::Relaxed);
                state
                    .failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(failure.clone());
                state.emit(JobEvent::TileFailed(failure));
            }
        }
    }
}

// Counts a worker out even when it unwinds.
struct LiveGuard<'a>(&'a JobState);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        let mut control = self.0.lock();
        control.live -= 1;
        self.0.finish_if_idle(&mut control);
        self.0.signal.notify_all();
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
