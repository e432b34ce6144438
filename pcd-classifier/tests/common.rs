//! Shared fixtures for the classification integration tests.

#![allow(dead_code)]

use std::{thread, time::Duration};

use pcd_classifier::{GeometricSubClassifier, SubClassifier, TileContext};
use pcd_core::{
    config::ClassificationConfig,
    pointcloud::{
        classification::Classification,
        point::{Point, PointCloud},
        store::PointStore,
    },
};

/// Flat ground at z = 0 on a regular `side` x `side` grid.
pub fn plane(side: usize, spacing: f64) -> Vec<Point> {
    let mut points = Vec::with_capacity(side * side);
    for j in 0..side {
        for i in 0..side {
            points.push(Point::new(i as f64 * spacing, j as f64 * spacing, 0.0));
        }
    }
    points
}

/// 50 points hovering 3 m above the ground inside x, y in [6, 8].
pub fn raised_cluster() -> Vec<Point> {
    let mut points = Vec::with_capacity(50);
    for j in 0..5 {
        for i in 0..10 {
            points.push(Point::new(6.1 + i as f64 * 0.2, 6.1 + j as f64 * 0.4, 3.0));
        }
    }
    points
}

pub fn store_of(points: Vec<Point>) -> PointStore {
    let mut store = PointStore::new();
    store.load(PointCloud::new(points)).unwrap();
    store
}

/// Tile edge 5, slope 5 degrees, smoothness 0.9, thickness 0.1.
pub fn config(threads: usize) -> ClassificationConfig {
    ClassificationConfig {
        tile_size: 5.0,
        threads,
        min_smoothness: 0.9,
        max_slope: 5.0,
        thickness: 0.1,
        ..Default::default()
    }
}

pub fn classes(store: &PointStore) -> Vec<Classification> {
    store.points().iter().map(|p| p.classification).collect()
}

/// The geometric refinement, slowed down by `delay` per tile.
pub struct SlowSubClassifier {
    pub delay: Duration,
    pub inner: GeometricSubClassifier,
}

impl SlowSubClassifier {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: GeometricSubClassifier::default(),
        }
    }
}

impl SubClassifier for SlowSubClassifier {
    fn refine(&self, context: &TileContext<'_>, classes: &mut [Classification]) {
        thread::sleep(self.delay);
        self.inner.refine(context, classes);
    }
}

/// Panics on any tile containing a point above `ceiling`.
pub struct PanickingSubClassifier {
    pub ceiling: f64,
}

impl SubClassifier for PanickingSubClassifier {
    fn refine(&self, context: &TileContext<'_>, _classes: &mut [Classification]) {
        if context.points.iter().any(|p| p[2] > self.ceiling) {
            panic!("point above {}", self.ceiling);
        }
    }
}
