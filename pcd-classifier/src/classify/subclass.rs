use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};

use pcd_core::{error::ConfigError, pointcloud::classification::Classification};

use super::ground::GroundSurface;

/// Everything a sub-classifier may read about one tile.
///
/// Local points are the tile's owned points followed by its context points.
pub struct TileContext<'a> {
    pub points: &'a [[f64; 3]],
    pub intensities: &'a [u16],
    pub ground: &'a [bool],
    pub owned: usize,
    pub surface: &'a GroundSurface,
    pub(crate) cancel: &'a AtomicBool,
    // Lowest local z, the reference height when the tile has no ground.
    floor: f64,
}

impl<'a> TileContext<'a> {
    pub(crate) fn new(
        points: &'a [[f64; 3]],
        intensities: &'a [u16],
        ground: &'a [bool],
        owned: usize,
        surface: &'a GroundSurface,
        cancel: &'a AtomicBool,
    ) -> Self {
        let floor = points.iter().map(|p| p[2]).fold(f64::MAX, f64::min);
        Self {
            points,
            intensities,
            ground,
            owned,
            surface,
            cancel,
            floor,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Height of local point `i` above the ground surface, or above the lowest
    /// local point when the tile has no ground.
    pub fn height_above_ground(&self, i: usize) -> f64 {
        let [x, y, z] = self.points[i];
        match self.surface.height_at(x, y) {
            Some(ground) => z - ground,
            None => z - self.floor,
        }
    }
}

/// Refines nonground points into structural and vegetation classes.
pub trait SubClassifier: Send + Sync {
    /// `classes` holds `Ground` or `NonGround` for each owned point; implementations
    /// overwrite the `NonGround` entries they can resolve. Returning early is
    /// allowed once `context.is_cancelled()` reports true.
    fn refine(&self, context: &TileContext<'_>, classes: &mut [Classification]);
}

/// Thresholds of [`GeometricSubClassifier`]. Lengths are in cloud units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubclassThresholds {
    /// Radius of the neighbourhood used for shape features and clustering.
    pub neighborhood_radius: f64,
    /// Fewest neighbours needed to compute shape features.
    pub min_neighbors: usize,
    pub isolation_radius: f64,
    /// A point with at most this many neighbours within `isolation_radius` is isolated.
    pub isolation_max_neighbors: usize,
    /// Depth below ground beyond which a point is low noise.
    pub low_noise_depth: f64,
    /// Isolated points higher than this are high noise.
    pub high_noise_min_height: f64,
    pub water_max_height: f64,
    /// Water returns are darker than this fraction of the tile's median intensity.
    pub water_intensity_ratio: f64,
    pub road_max_height: f64,
    pub rail_max_height: f64,
    /// Rail returns are brighter than this multiple of the tile's median intensity.
    pub rail_intensity_ratio: f64,
    pub low_vegetation_max_height: f64,
    pub medium_vegetation_max_height: f64,
    pub building_min_height: f64,
    pub building_min_points: usize,
    /// Smallest horizontal footprint of a structure cluster.
    pub building_min_area: f64,
    pub planarity_min: f64,
    /// Vertical component of the normal of a horizontal surface.
    pub horizontal_normal_min: f64,
    pub linearity_min: f64,
    pub wire_min_height: f64,
    /// Largest vertical component of a wire direction.
    pub wire_max_direction_z: f64,
    /// Smallest vertical component of a tower direction.
    pub tower_min_direction_z: f64,
    /// Length over width of a structure cluster that may be a bridge.
    pub bridge_min_elongation: f64,
    /// Fraction of a bridge's points with ground visible underneath.
    pub bridge_min_gap_fraction: f64,
    /// Conductors this close to the highest conductor are guard wires.
    pub guard_band: f64,
}

impl Default for SubclassThresholds {
    fn default() -> Self {
        Self {
            neighborhood_radius: 1.0,
            min_neighbors: 5,
            isolation_radius: 2.0,
            isolation_max_neighbors: 1,
            low_noise_depth: 0.5,
            high_noise_min_height: 2.0,
            water_max_height: 0.2,
            water_intensity_ratio: 0.5,
            road_max_height: 0.3,
            rail_max_height: 0.5,
            rail_intensity_ratio: 1.5,
            low_vegetation_max_height: 0.5,
            medium_vegetation_max_height: 2.0,
            building_min_height: 2.0,
            building_min_points: 30,
            building_min_area: 2.0,
            planarity_min: 0.4,
            horizontal_normal_min: 0.9,
            linearity_min: 0.9,
            wire_min_height: 3.0,
            wire_max_direction_z: 0.3,
            tower_min_direction_z: 0.8,
            bridge_min_elongation: 3.0,
            bridge_min_gap_fraction: 0.5,
            guard_band: 1.0,
        }
    }
}

impl SubclassThresholds {
    /// Radii must be positive; heights, areas, ratios and the guard band non-negative;
    /// shape fractions within `0..=1`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let radii = [
            ("neighborhood_radius", self.neighborhood_radius),
            ("isolation_radius", self.isolation_radius),
        ];
        for (name, value) in radii {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Threshold { name, value });
            }
        }

        let non_negative = [
            ("low_noise_depth", self.low_noise_depth),
            ("high_noise_min_height", self.high_noise_min_height),
            ("water_max_height", self.water_max_height),
            ("water_intensity_ratio", self.water_intensity_ratio),
            ("road_max_height", self.road_max_height),
            ("rail_max_height", self.rail_max_height),
            ("rail_intensity_ratio", self.rail_intensity_ratio),
            ("low_vegetation_max_height", self.low_vegetation_max_height),
            ("medium_vegetation_max_height", self.medium_vegetation_max_height),
            ("building_min_height", self.building_min_height),
            ("building_min_area", self.building_min_area),
            ("wire_min_height", self.wire_min_height),
            ("bridge_min_elongation", self.bridge_min_elongation),
            ("guard_band", self.guard_band),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Threshold { name, value });
            }
        }

        let fractions = [
            ("planarity_min", self.planarity_min),
            ("horizontal_normal_min", self.horizontal_normal_min),
            ("linearity_min", self.linearity_min),
            ("wire_max_direction_z", self.wire_max_direction_z),
            ("tower_min_direction_z", self.tower_min_direction_z),
            ("bridge_min_gap_fraction", self.bridge_min_gap_fraction),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Threshold { name, value });
            }
        }
        Ok(())
    }
}

/// Rule-based refinement from height above ground, local shape, intensity and
/// cluster size.
#[derive(Debug, Clone, Default)]
pub struct GeometricSubClassifier {
    pub thresholds: SubclassThresholds,
}

impl GeometricSubClassifier {
    pub fn new(thresholds: SubclassThresholds) -> Self {
        Self { thresholds }
    }
}

// Eigen-features of a neighbourhood covariance.
#[derive(Debug, Clone, Copy)]
struct Shape {
    linearity: f64,
    planarity: f64,
    /// |z| of the smallest-variance axis.
    normal_z: f64,
    /// |z| of the largest-variance axis.
    direction_z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Label {
    Ground,
    Class(Classification),
    StructureCandidate,
    Unresolved,
}

// Points bucketed on a horizontal grid for radius queries.
struct NeighborIndex<'a> {
    points: &'a [[f64; 3]],
    cell: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl<'a> NeighborIndex<'a> {
    fn new(points: &'a [[f64; 3]], cell: f64) -> Self {
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            cells.entry(Self::key(p, cell)).or_default().push(i);
        }
        Self {
            points,
            cell,
            cells,
        }
    }

    fn key(p: &[f64; 3], cell: f64) -> (i64, i64) {
        ((p[0] / cell).floor() as i64, (p[1] / cell).floor() as i64)
    }

    /// Calls `f` with every point other than `center` within `radius`, in 3D or in plan.
    fn for_each_within(&self, center: usize, radius: f64, planar: bool, mut f: impl FnMut(usize)) {
        let c = &self.points[center];
        let reach = (radius / self.cell).ceil() as i64;
        let (kx, ky) = Self::key(c, self.cell);
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                let Some(bucket) = self.cells.get(&(kx + dx, ky + dy)) else {
                    continue;
                };
                for &j in bucket {
                    if j == center {
                        continue;
                    }
                    let p = &self.points[j];
                    let mut d2 = (p[0] - c[0]).powi(2) + (p[1] - c[1]).powi(2);
                    if !planar {
                        d2 += (p[2] - c[2]).powi(2);
                    }
                    if d2 <= radius * radius {
                        f(j);
                    }
                }
            }
        }
    }

    fn neighbors(&self, center: usize, radius: f64) -> Vec<usize> {
        let mut found = Vec::new();
        self.for_each_within(center, radius, false, |j| found.push(j));
        found
    }
}

fn shape_of(points: &[[f64; 3]], center: usize, neighbors: &[usize]) -> Option<Shape> {
    let members = || std::iter::once(center).chain(neighbors.iter().copied());
    let count = (neighbors.len() + 1) as f64;

    let mean = members().fold(Vector3::zeros(), |acc, i| acc + Vector3::from(points[i])) / count;
    let covariance = members().fold(Matrix3::zeros(), |acc, i| {
        let d = Vector3::from(points[i]) - mean;
        acc + d * d.transpose()
    }) / count;

    let eigen = SymmetricEigen::new(covariance);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
    let [l1, l2, l3] = order.map(|k| eigen.eigenvalues[k].max(0.0));
    if !(l1 > 0.0 && l1.is_finite()) {
        return None;
    }

    Some(Shape {
        linearity: (l1 - l2) / l1,
        planarity: (l2 - l3) / l1,
        normal_z: eigen.eigenvectors.column(order[2])[2].abs(),
        direction_z: eigen.eigenvectors.column(order[0])[2].abs(),
    })
}

fn median(values: &[u16]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted[sorted.len() / 2] as f64
}

impl GeometricSubClassifier {
    fn vegetation(&self, height: f64) -> Classification {
        let t = &self.thresholds;
        if height <= t.low_vegetation_max_height {
            Classification::LowVegetation
        } else if height <= t.medium_vegetation_max_height {
            Classification::MediumVegetation
        } else {
            Classification::HighVegetation
        }
    }

    fn label_point(
        &self,
        context: &TileContext<'_>,
        index: &NeighborIndex<'_>,
        median_intensity: f64,
        i: usize,
        height: f64,
    ) -> Label {
        let t = &self.thresholds;

        if height < -t.low_noise_depth {
            return Label::Class(Classification::LowNoise);
        }
        if height > t.high_noise_min_height {
            let mut count = 0;
            index.for_each_within(i, t.isolation_radius, false, |_| count += 1);
            if count <= t.isolation_max_neighbors {
                return Label::Class(Classification::HighNoise);
            }
        }

        let neighbors = index.neighbors(i, t.neighborhood_radius);
        let shape = if neighbors.len() >= t.min_neighbors {
            shape_of(context.points, i, &neighbors)
        } else {
            None
        };
        let intensity = context.intensities[i] as f64;
        let planar_horizontal = shape.map_or(false, |s| {
            s.planarity >= t.planarity_min && s.normal_z >= t.horizontal_normal_min
        });

        if height.abs() <= t.water_max_height
            && planar_horizontal
            && median_intensity > 0.0
            && intensity <= t.water_intensity_ratio * median_intensity
        {
            return Label::Class(Classification::Water);
        }
        if height <= 0.0 {
            return Label::Unresolved;
        }

        if let Some(s) = shape.filter(|s| s.linearity >= t.linearity_min) {
            if s.direction_z >= t.tower_min_direction_z && height > t.low_vegetation_max_height {
                return Label::Class(Classification::Tower);
            }
            if s.direction_z <= t.wire_max_direction_z {
                if height >= t.wire_min_height {
                    return Label::Class(Classification::WireConductor);
                }
                if height <= t.rail_max_height
                    && median_intensity > 0.0
                    && intensity >= t.rail_intensity_ratio * median_intensity
                {
                    return Label::Class(Classification::Rail);
                }
            }
        }

        if height <= t.road_max_height && planar_horizontal {
            return Label::Class(Classification::Road);
        }
        if height > t.building_min_height && shape.map_or(false, |s| s.planarity >= t.planarity_min) {
            return Label::StructureCandidate;
        }
        Label::Class(self.vegetation(height))
    }

    // Connected structure candidates become buildings or bridges when large enough.
    fn resolve_structures(
        &self,
        context: &TileContext<'_>,
        index: &NeighborIndex<'_>,
        heights: &[f64],
        labels: &mut [Label],
    ) {
        let t = &self.thresholds;
        let mut visited = vec![false; labels.len()];

        for start in 0..labels.len() {
            if visited[start] || labels[start] != Label::StructureCandidate {
                continue;
            }
            let mut cluster = vec![start];
            visited[start] = true;
            let mut cursor = 0;
            while cursor < cluster.len() {
                let current = cluster[cursor];
                cursor += 1;
                index.for_each_within(current, t.neighborhood_radius, false, |j| {
                    if !visited[j] && labels[j] == Label::StructureCandidate {
                        visited[j] = true;
                        cluster.push(j);
                    }
                });
            }

            let (min_x, min_y, max_x, max_y) = cluster.iter().fold(
                (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
                |(a, b, c, d), &i| {
                    let p = &context.points[i];
                    (a.min(p[0]), b.min(p[1]), c.max(p[0]), d.max(p[1]))
                },
            );
            let (long, short) = {
                let (w, h) = (max_x - min_x, max_y - min_y);
                (w.max(h), w.min(h))
            };

            let class = if cluster.len() >= t.building_min_points && long * short >= t.building_min_area {
                let elongation = long / short.max(f64::EPSILON);
                let mut open = 0;
                for &i in &cluster {
                    let mut ground_below = false;
                    index.for_each_within(i, t.neighborhood_radius, true, |j| {
                        ground_below |= context.ground[j];
                    });
                    if ground_below {
                        open += 1;
                    }
                }
                let gap_fraction = open as f64 / cluster.len() as f64;
                if elongation >= t.bridge_min_elongation && gap_fraction >= t.bridge_min_gap_fraction {
                    Some(Classification::Bridge)
                } else {
                    Some(Classification::Building)
                }
            } else {
                None
            };

            for &i in &cluster {
                labels[i] = Label::Class(class.unwrap_or_else(|| self.vegetation(heights[i])));
            }
        }
    }

    // Towers touching conductors hold insulators; the top conductors are guard wires.
    fn resolve_wires(&self, context: &TileContext<'_>, index: &NeighborIndex<'_>, labels: &mut [Label]) {
        let t = &self.thresholds;

        let insulators: Vec<usize> = (0..labels.len())
            .filter(|&i| labels[i] == Label::Class(Classification::Tower))
            .filter(|&i| {
                let mut touches = false;
                index.for_each_within(i, t.neighborhood_radius, false, |j| {
                    touches |= labels[j] == Label::Class(Classification::WireConductor);
                });
                touches
            })
            .collect();
        for i in insulators {
            labels[i] = Label::Class(Classification::Insulator);
        }

        let conductors: Vec<usize> = (0..labels.len())
            .filter(|&i| labels[i] == Label::Class(Classification::WireConductor))
            .collect();
        let (low, high) = conductors.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &i| {
            (lo.min(context.points[i][2]), hi.max(context.points[i][2]))
        });
        if !conductors.is_empty() && high - low > 2.0 * t.guard_band {
            for i in conductors {
                if context.points[i][2] >= high - t.guard_band {
                    labels[i] = Label::Class(Classification::WireGuard);
                }
            }
        }
    }
}

fn duplicate_locations(points: &[[f64; 3]]) -> Vec<bool> {
    let mut seen: HashMap<[u64; 3], usize> = HashMap::new();
    for p in points {
        *seen.entry(p.map(f64::to_bits)).or_insert(0) += 1;
    }
    points
        .iter()
        .map(|p| seen.get(&p.map(f64::to_bits)).copied().unwrap_or(0) > 1)
        .collect()
}

impl SubClassifier for GeometricSubClassifier {
    fn refine(&self, context: &TileContext<'_>, classes: &mut [Classification]) {
        let n = context.len();
        let index = NeighborIndex::new(context.points, self.thresholds.neighborhood_radius);
        let median_intensity = median(context.intensities);
        let heights: Vec<f64> = (0..n).map(|i| context.height_above_ground(i)).collect();

        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            if context.is_cancelled() {
                return;
            }
            let label = if context.ground[i] {
                Label::Ground
            } else {
                self.label_point(context, &index, median_intensity, i, heights[i])
            };
            labels.push(label);
        }

        self.resolve_structures(context, &index, &heights, &mut labels);
        self.resolve_wires(context, &index, &mut labels);

        let duplicates = duplicate_locations(context.points);
        for (i, class) in classes.iter_mut().enumerate().take(context.owned) {
            if *class != Classification::NonGround {
                continue;
            }
            *class = match labels[i] {
                Label::Class(resolved) => resolved,
                Label::Unresolved if duplicates[i] => Classification::Overlap,
                Label::Unresolved => Classification::Reserved,
                Label::Ground | Label::StructureCandidate => Classification::NonGround,
            };
        }
    }
}
