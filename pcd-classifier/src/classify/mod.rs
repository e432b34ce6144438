use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use pcd_core::{
    config::ClassificationConfig,
    pointcloud::{classification::Classification, point::Point},
};

use crate::{error::TileFitError, tiler::Tile};

pub mod ground;
pub mod subclass;
pub mod surface;

use ground::GroundParams;
use subclass::{GeometricSubClassifier, SubClassifier, TileContext};

/// Per-tile classifier: ground separation followed by optional sub-classification.
#[derive(Clone)]
pub struct GroundClassifier {
    params: GroundParams,
    separate_classes: bool,
    sub_classifier: Arc<dyn SubClassifier>,
}

impl GroundClassifier {
    pub fn new(config: &ClassificationConfig) -> Self {
        Self::with_sub_classifier(config, Arc::new(GeometricSubClassifier::default()))
    }

    pub fn with_sub_classifier(
        config: &ClassificationConfig,
        sub_classifier: Arc<dyn SubClassifier>,
    ) -> Self {
        Self {
            params: GroundParams {
                thickness: config.thickness,
                max_gradient: config.max_slope_tangent(),
                min_smoothness: config.min_smoothness,
            },
            separate_classes: config.separate_classes,
            sub_classifier,
        }
    }

    /// Classes of the tile's owned points, in `tile.points` order.
    ///
    /// `Ok(None)` means `cancel` was raised and nothing should be committed.
    pub fn classify(
        &self,
        points: &[Point],
        tile: &Tile,
        cancel: &AtomicBool,
    ) -> Result<Option<Vec<Classification>>, TileFitError> {
        let owned = tile.points.len();
        if owned == 0 {
            return Ok(Some(Vec::new()));
        }

        let local: Vec<[f64; 3]> = tile.local_indices().map(|i| points[i].xyz()).collect();
        if local.len() < 3 {
            return Ok(Some(vec![Classification::NonGround; owned]));
        }

        let Some(separation) = ground::separate(&local, &self.params, cancel)? else {
            return Ok(None);
        };

        let mut classes: Vec<Classification> = separation.ground[..owned]
            .iter()
            .map(|&is_ground| {
                if is_ground {
                    Classification::Ground
                } else {
                    Classification::NonGround
                }
            })
            .collect();

        if self.separate_classes {
            let intensities: Vec<u16> = tile
                .local_indices()
                .map(|i| points[i].attributes.intensity)
                .collect();
            let context = TileContext::new(
                &local,
                &intensities,
                &separation.ground,
                owned,
                &separation.surface,
                cancel,
            );
            self.sub_classifier.refine(&context, &mut classes);
        }

        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }
        Ok(Some(classes))
    }
}

#[cfg(test)]
mod tests {
    use crate::tiler::Tiler;

    use super::*;

    fn config() -> ClassificationConfig {
        ClassificationConfig {
            tile_size: 5.0,
            threads: 1,
            min_smoothness: 0.9,
            max_slope: 5.0,
            thickness: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn tiny_tiles_are_nonground() {
        let points = vec![Point::new(0.0, 0.0, 0.0), Point::new(1.0, 1.0, 0.0)];
        let grid = Tiler::new(10.0).unwrap().tile(&points);
        let classes = GroundClassifier::new(&config())
            .classify(&points, &grid.tiles[0], &AtomicBool::new(false))
            .unwrap()
            .unwrap();
        assert_eq!(classes, vec![Classification::NonGround; 2]);
    }

    #[test]
    fn classifies_owned_points_only() {
        let mut points = Vec::new();
        for j in 0..40 {
            for i in 0..40 {
                points.push(Point::new(i as f64 * 0.25, j as f64 * 0.25, 0.0));
            }
        }
        let grid = Tiler::new(5.0)
            .unwrap()
            .with_overlap(1.0)
            .unwrap()
            .tile(&points);
        let classifier = GroundClassifier::new(&config());

        for tile in &grid.tiles {
            let classes = classifier
                .classify(&points, tile, &AtomicBool::new(false))
                .unwrap()
                .unwrap();
            assert_eq!(classes.len(), tile.points.len());
            assert!(classes.iter().all(|c| c.is_ground()));
        }
    }

    #[test]
    fn raised_cancel_discards_result() {
        let points: Vec<Point> = (0..100)
            .map(|k| Point::new((k % 10) as f64, (k / 10) as f64, 0.0))
            .collect();
        let grid = Tiler::new(100.0).unwrap().tile(&points);
        let result = GroundClassifier::new(&config())
            .classify(&points, &grid.tiles[0], &AtomicBool::new(true))
            .unwrap();
        assert!(result.is_none());
    }
}
