//! End-to-end classification scenarios run through the job scheduler.

mod common;

use std::sync::Arc;

use pcd_classifier::{JobPhase, JobScheduler, TileFitError};
use pcd_core::{config::ClassificationConfig, pointcloud::classification::Classification};

use common::{classes, config, plane, raised_cluster, store_of, PanickingSubClassifier};

fn run(scheduler: &mut JobScheduler, config: &ClassificationConfig) -> Vec<Classification> {
    scheduler.start(config).unwrap();
    let report = scheduler.wait().unwrap();
    assert_eq!(report.phase, JobPhase::Completed);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    classes(scheduler.store().unwrap())
}

#[test]
fn flat_plane_is_all_ground() {
    let mut scheduler = JobScheduler::new(store_of(plane(100, 0.1)));
    let classes = run(&mut scheduler, &config(2));

    assert_eq!(classes.len(), 10_000);
    assert!(classes.iter().all(|&c| c == Classification::Ground));
    assert_eq!(scheduler.progress().tiles_total, 4);
}

#[test]
fn raised_cluster_is_not_ground() {
    let mut points = plane(100, 0.1);
    points.extend(raised_cluster());
    let mut scheduler = JobScheduler::new(store_of(points));
    let classes = run(&mut scheduler, &config(4));

    let (ground, cluster) = classes.split_at(10_000);
    assert!(ground.iter().all(|&c| c == Classification::Ground));
    assert!(cluster.iter().all(|&c| c == Classification::NonGround));
}

#[test]
fn raised_cluster_gets_a_structural_class() {
    let mut points = plane(100, 0.1);
    points.extend(raised_cluster());
    let mut scheduler = JobScheduler::new(store_of(points));
    let classes = run(
        &mut scheduler,
        &ClassificationConfig {
            separate_classes: true,
            ..config(2)
        },
    );

    let (ground, cluster) = classes.split_at(10_000);
    assert!(ground.iter().all(|&c| c == Classification::Ground));
    for class in cluster {
        assert!(
            matches!(
                class,
                Classification::Building | Classification::HighVegetation
            ),
            "unexpected class {:?}",
            class
        );
    }
}

#[test]
fn thread_count_does_not_change_results() {
    let mut points = plane(100, 0.1);
    points.extend(raised_cluster());
    let config = |threads| ClassificationConfig {
        separate_classes: true,
        ..config(threads)
    };

    let single = run(&mut JobScheduler::new(store_of(points.clone())), &config(1));
    let parallel = run(&mut JobScheduler::new(store_of(points)), &config(4));
    assert_eq!(single, parallel);
}

#[test]
fn reclassification_is_stable() {
    let mut points = plane(100, 0.1);
    points.extend(raised_cluster());
    let mut scheduler = JobScheduler::new(store_of(points));

    let first = run(&mut scheduler, &config(3));
    let second = run(&mut scheduler, &config(3));
    assert_eq!(first, second);
}

#[test]
fn panicking_tile_fails_alone() {
    let mut points = plane(100, 0.1);
    points.extend(raised_cluster());
    let mut scheduler = JobScheduler::new(store_of(points))
        .with_sub_classifier(Arc::new(PanickingSubClassifier { ceiling: 1.0 }));

    scheduler
        .start(&ClassificationConfig {
            separate_classes: true,
            ..config(2)
        })
        .unwrap();
    let report = scheduler.wait().unwrap();

    assert_eq!(report.phase, JobPhase::Completed);
    assert_eq!(report.tiles_completed, 3);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!((failure.col, failure.row), (1, 1));
    assert_eq!(failure.point_count, 2_550);
    assert!(matches!(&failure.error, TileFitError::Panicked(message) if message.contains("point above")));

    let store = scheduler.store().unwrap();
    for point in store.points() {
        let in_failed_tile = point.x >= 5.0 && point.y >= 5.0;
        if in_failed_tile {
            assert_eq!(point.classification, Classification::Raw);
        } else {
            assert_eq!(point.classification, Classification::Ground);
        }
    }
}

#[test]
fn failed_tile_is_reset_on_rerun() {
    let mut points = plane(100, 0.1);
    points.extend(raised_cluster());
    let separate = ClassificationConfig {
        separate_classes: true,
        ..config(2)
    };

    let mut first = JobScheduler::new(store_of(points));
    let classified = run(&mut first, &separate);
    assert!(classified.iter().all(|&c| c != Classification::Raw));

    let mut scheduler = JobScheduler::new(first.into_store().unwrap())
        .with_sub_classifier(Arc::new(PanickingSubClassifier { ceiling: 1.0 }));
    scheduler.start(&separate).unwrap();
    let report = scheduler.wait().unwrap();
    assert_eq!(report.phase, JobPhase::Completed);
    assert_eq!(report.failures.len(), 1);

    let store = scheduler.store().unwrap();
    let failed = store
        .points()
        .iter()
        .filter(|p| p.x >= 5.0 && p.y >= 5.0)
        .inspect(|p| assert_eq!(p.classification, Classification::Raw))
        .count();
    assert_eq!(failed, 2_550);
    assert!(store
        .points()
        .iter()
        .filter(|p| p.x < 5.0 || p.y < 5.0)
        .all(|p| p.classification == Classification::Ground));
}
