//! Pause, resume and stop of running classification jobs.

mod common;

use std::{sync::Arc, thread, time::Duration};

use pcd_classifier::{JobError, JobEvent, JobPhase, JobScheduler};
use pcd_core::{config::ClassificationConfig, pointcloud::classification::Classification};

use common::{classes, config, plane, raised_cluster, store_of, SlowSubClassifier};

// 16 tiles of 2 m over a 40 x 40 grid, each taking at least `delay`.
fn slow_scheduler(delay: Duration) -> JobScheduler {
    JobScheduler::new(store_of(plane(40, 0.2)))
        .with_sub_classifier(Arc::new(SlowSubClassifier::new(delay)))
}

fn slow_config(threads: usize) -> ClassificationConfig {
    ClassificationConfig {
        tile_size: 2.0,
        separate_classes: true,
        ..config(threads)
    }
}

#[test]
fn pause_and_resume_match_an_uninterrupted_run() {
    let mut points = plane(100, 0.1);
    points.extend(raised_cluster());
    let config = ClassificationConfig {
        tile_size: 2.0,
        separate_classes: true,
        ..config(2)
    };

    let mut reference = JobScheduler::new(store_of(points.clone()));
    reference.start(&config).unwrap();
    assert_eq!(reference.wait().unwrap().phase, JobPhase::Completed);
    let expected = classes(reference.store().unwrap());

    let mut scheduler = JobScheduler::new(store_of(points))
        .with_sub_classifier(Arc::new(SlowSubClassifier::new(Duration::from_millis(30))));
    let handle = scheduler.start(&config).unwrap();
    thread::sleep(Duration::from_millis(50));

    match handle.pause() {
        Ok(()) if handle.phase() == JobPhase::Paused => {
            let paused_at = handle.progress();
            assert!(paused_at.tiles_completed < paused_at.tiles_total);
            thread::sleep(Duration::from_millis(100));
            assert_eq!(handle.progress(), paused_at);
            assert!(matches!(
                handle.pause(),
                Err(JobError::InvalidTransition {
                    action: "pause",
                    phase: JobPhase::Paused
                })
            ));
            handle.resume().unwrap();
        }
        Ok(()) => assert_eq!(handle.phase(), JobPhase::Completed),
        Err(JobError::InvalidTransition { phase, .. }) => assert_eq!(phase, JobPhase::Completed),
        Err(e) => panic!("unexpected error: {}", e),
    }

    let report = scheduler.wait().unwrap();
    assert_eq!(report.phase, JobPhase::Completed);
    assert_eq!(report.tiles_completed, report.tile_count);
    assert!(report.failures.is_empty());
    assert_eq!(classes(scheduler.store().unwrap()), expected);
}

#[test]
fn stop_keeps_finished_tiles() {
    let mut scheduler = slow_scheduler(Duration::from_millis(40));
    let events = scheduler.subscribe();
    let handle = scheduler.start(&slow_config(1)).unwrap();

    loop {
        match events.recv_timeout(Duration::from_secs(10)).unwrap() {
            JobEvent::TileFinished { .. } => break,
            JobEvent::TileFailed(failure) => panic!("{}", failure),
            JobEvent::Finished { phase } => panic!("finished early: {}", phase),
        }
    }
    handle.stop().unwrap();
    assert_eq!(handle.phase(), JobPhase::Stopped);
    assert!(handle.stop().is_err());
    assert!(handle.resume().is_err());

    let report = scheduler.wait().unwrap();
    assert_eq!(report.phase, JobPhase::Stopped);
    assert!(report.tiles_completed >= 1);
    assert!(report.tiles_completed < 16);
    assert_eq!(report.point_count, 1600);

    let store = scheduler.store().unwrap();
    let classified = store
        .points()
        .iter()
        .filter(|p| p.classification != Classification::Raw)
        .count();
    assert_eq!(classified, report.points_classified);
    assert!(store
        .points()
        .iter()
        .all(|p| matches!(p.classification, Classification::Raw | Classification::Ground)));

    let stopped = events
        .try_iter()
        .filter(|e| matches!(e, JobEvent::Finished { phase: JobPhase::Stopped }))
        .count();
    assert_eq!(stopped, 1);
}

#[test]
fn dropping_scheduler_stops_job() {
    let mut scheduler = slow_scheduler(Duration::from_millis(40));
    let events = scheduler.subscribe();
    let handle = scheduler.start(&slow_config(1)).unwrap();
    drop(scheduler);

    assert_eq!(handle.phase(), JobPhase::Stopped);
    assert!(events
        .try_iter()
        .any(|e| e == JobEvent::Finished { phase: JobPhase::Stopped }));
}

#[test]
fn new_job_after_stop() {
    let mut scheduler = slow_scheduler(Duration::from_millis(20));
    scheduler.start(&slow_config(2)).unwrap();
    scheduler.stop().ok();
    scheduler.wait().unwrap();

    scheduler.start(&slow_config(4)).unwrap();
    let report = scheduler.wait().unwrap();
    assert_eq!(report.phase, JobPhase::Completed);
    assert_eq!(report.tiles_completed, 16);
}
