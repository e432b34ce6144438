use std::collections::BTreeMap;

use crate::error::FormatError;

use super::{
    classification::Classification,
    point::{BoundingVolume, Metadata, Point, PointCloud},
};

/// In-memory point collection.
///
/// Points are appended by [`PointStore::load`] and never reordered. After load only
/// the classification of a point can be changed.
#[derive(Debug, Default)]
pub struct PointStore {
    points: Vec<Point>,
    metadata: Metadata,
}

impl PointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every point of `cloud`, returning how many were added.
    ///
    /// The whole cloud is validated first; on error nothing is appended.
    pub fn load(&mut self, cloud: PointCloud) -> Result<usize, FormatError> {
        let base = self.points.len();
        if let Some((offset, point)) = cloud
            .points
            .iter()
            .enumerate()
            .find(|(_, point)| !point.is_finite())
        {
            return Err(FormatError::NonFiniteCoordinate {
                index: base + offset,
                x: point.x,
                y: point.y,
                z: point.z,
            });
        }

        let added = cloud.points.len();
        if self.points.is_empty() {
            self.metadata.scale = cloud.metadata.scale;
            self.metadata.offset = cloud.metadata.offset;
        } else {
            for axis in 0..3 {
                self.metadata.scale[axis] = self.metadata.scale[axis].min(cloud.metadata.scale[axis]);
                self.metadata.offset[axis] = self.metadata.offset[axis].min(cloud.metadata.offset[axis]);
            }
        }
        for point in &cloud.points {
            self.metadata.bounding_volume.extend(point);
        }
        self.metadata.other.extend(cloud.metadata.other);
        self.points.extend(cloud.points);
        self.metadata.point_count = self.points.len();

        Ok(added)
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.metadata = Metadata::default();
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    pub fn classification_mut(&mut self, index: usize) -> Option<&mut Classification> {
        self.points.get_mut(index).map(|point| &mut point.classification)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn bounding_volume(&self) -> &BoundingVolume {
        &self.metadata.bounding_volume
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn class_counts(&self) -> BTreeMap<Classification, usize> {
        let mut counts = BTreeMap::new();
        for point in &self.points {
            *counts.entry(point.classification).or_insert(0) += 1;
        }
        counts
    }

    /// Moves the points out, leaving the store empty but keeping its metadata.
    pub fn take_points(&mut self) -> Vec<Point> {
        std::mem::take(&mut self.points)
    }

    /// Puts back points previously obtained from [`PointStore::take_points`].
    pub fn restore_points(&mut self, points: Vec<Point>) {
        debug_assert!(self.points.is_empty());
        debug_assert_eq!(points.len(), self.metadata.point_count);
        self.points = points;
    }
}
