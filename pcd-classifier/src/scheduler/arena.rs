use std::sync::atomic::{AtomicU8, Ordering};

use pcd_core::pointcloud::{classification::Classification, point::Point};

/// Points of a running job with a separately writable classification column.
///
/// Geometry is read-shared by every worker; each classification cell is written by
/// the single worker owning the point's tile.
pub(crate) struct PointArena {
    points: Vec<Point>,
    classes: Vec<AtomicU8>,
}

impl PointArena {
    pub fn new(points: Vec<Point>) -> Self {
        let classes = points
            .iter()
            .map(|point| AtomicU8::new(point.classification.code()))
            .collect();
        Self { points, classes }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn set(&self, index: usize, class: Classification) {
        self.classes[index].store(class.code(), Ordering::Relaxed);
    }

    pub fn get(&self, index: usize) -> Classification {
        Classification::from_code(self.classes[index].load(Ordering::Relaxed))
    }

    /// Points with their current classification, leaving the arena intact.
    pub fn snapshot(&self) -> Vec<Point> {
        self.points
            .iter()
            .enumerate()
            .map(|(index, point)| Point {
                classification: self.get(index),
                ..point.clone()
            })
            .collect()
    }

    pub fn into_points(self) -> Vec<Point> {
        let Self {
            mut points,
            classes,
        } = self;
        for (point, class) in points.iter_mut().zip(classes) {
            point.classification = Classification::from_code(class.into_inner());
        }
        points
    }
}
