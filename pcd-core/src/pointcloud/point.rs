use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::classification::Classification;

/// Default coordinate resolution used when nothing finer is known.
pub const DEFAULT_SCALE: f64 = 0.001;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointAttributes {
    pub intensity: u16,
    pub return_number: u8,
    pub number_of_returns: u8,
    pub scan_angle: f32,
    pub user_data: u8,
    pub point_source_id: u16,
    pub gps_time: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

// Coordinates are held as real values; LAS integer coordinates are expanded on read
// x = (x * scale[0]) + offset[0]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub color: Option<Color>,
    pub attributes: PointAttributes,
    pub classification: Classification,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Point {
            x,
            y,
            z,
            ..Default::default()
        }
    }

    pub fn with_intensity(mut self, intensity: u16) -> Self {
        self.attributes.intensity = intensity;
        self
    }

    pub fn xyz(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<Point>,
    pub metadata: Metadata,
}

impl PointCloud {
    pub fn new(points: Vec<Point>) -> Self {
        let mut bounding_volume = BoundingVolume::empty();
        let mut digits = [1usize; 3];

        for point in &points {
            bounding_volume.extend(point);

            for (value, digits) in [point.x, point.y, point.z].into_iter().zip(digits.iter_mut()) {
                *digits = (*digits).max(fractional_digits(value));
            }
        }

        let max_digits = digits.into_iter().max().unwrap_or(3) as i32;
        let scale = 0.1_f64.powi(max_digits);
        let offset = if bounding_volume.is_empty() {
            [0.0; 3]
        } else {
            bounding_volume.min
        };

        let metadata = Metadata {
            point_count: points.len(),
            bounding_volume,
            scale: [scale; 3],
            offset,
            other: HashMap::new(),
        };

        PointCloud { points, metadata }
    }

    pub fn with_scale(mut self, scale: [f64; 3], offset: [f64; 3]) -> Self {
        self.metadata.scale = scale;
        self.metadata.offset = offset;
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64, f64, &Point)> {
        self.points
            .iter()
            .map(|point| (point.x, point.y, point.z, point))
    }
}

// Number of significant decimals (up to 7) of a coordinate value.
fn fractional_digits(value: f64) -> usize {
    let value_str = format!("{:.7}", value);
    match value_str.find('.') {
        Some(dot_index) => value_str[dot_index + 1..].trim_end_matches('0').len(),
        None => 0,
    }
}

// Axis-aligned box of real coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Default for BoundingVolume {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingVolume {
    pub fn empty() -> Self {
        BoundingVolume {
            min: [f64::MAX; 3],
            max: [f64::MIN; 3],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0]
    }

    pub fn extend(&mut self, point: &Point) {
        for (axis, value) in point.xyz().into_iter().enumerate() {
            self.min[axis] = self.min[axis].min(value);
            self.max[axis] = self.max[axis].max(value);
        }
    }

    pub fn merge(&mut self, other: &BoundingVolume) {
        if other.is_empty() {
            return;
        }
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
    }

    pub fn width(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max[0] - self.min[0]
        }
    }

    pub fn depth(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max[1] - self.min[1]
        }
    }
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub point_count: usize,
    pub bounding_volume: BoundingVolume,
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    pub other: HashMap<String, String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            point_count: 0,
            bounding_volume: BoundingVolume::empty(),
            scale: [DEFAULT_SCALE; 3],
            offset: [0.0; 3],
            other: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_tracks_extent_and_resolution() {
        let cloud = PointCloud::new(vec![
            Point::new(1.25, 2.0, 3.0),
            Point::new(-1.0, 4.5, 0.125),
        ]);

        assert_eq!(cloud.metadata.point_count, 2);
        assert_eq!(cloud.metadata.bounding_volume.min, [-1.0, 2.0, 0.125]);
        assert_eq!(cloud.metadata.bounding_volume.max, [1.25, 4.5, 3.0]);
        assert!((cloud.metadata.scale[0] - 0.001).abs() < 1e-12);
        assert_eq!(cloud.metadata.offset, [-1.0, 2.0, 0.125]);
    }

    #[test]
    fn empty_volume_has_no_extent() {
        let volume = BoundingVolume::empty();
        assert!(volume.is_empty());
        assert_eq!(volume.width(), 0.0);
        assert_eq!(volume.depth(), 0.0);
    }

    #[test]
    fn new_point_is_raw() {
        let point = Point::new(0.0, 0.0, 0.0);
        assert_eq!(point.classification, Classification::Raw);
        assert!(point.is_finite());
        assert!(!Point::new(f64::NAN, 0.0, 0.0).is_finite());
    }
}
