use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TileFitError;

use super::surface::{fit_plane, smoothness, Plane};

const POINTS_PER_PATCH: usize = 64;
const MAX_PATCHES_PER_SIDE: usize = 16;
const MAX_ITERATIONS: usize = 16;
const MIN_SEEDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundParams {
    pub thickness: f64,
    /// Steepest accepted ground gradient (rise over run).
    pub max_gradient: f64,
    pub min_smoothness: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePatch {
    pub center: (f64, f64),
    pub plane: Plane,
}

/// Piecewise-planar ground estimate of one tile.
#[derive(Debug, Clone, Default)]
pub struct GroundSurface {
    pub patches: Vec<SurfacePatch>,
}

impl GroundSurface {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn nearest(&self, x: f64, y: f64) -> Option<&SurfacePatch> {
        nearest_by_center(self.patches.iter().map(|patch| patch.center), (x, y))
            .map(|index| &self.patches[index])
    }

    /// Ground height under `(x, y)` taken from the nearest patch plane.
    pub fn height_at(&self, x: f64, y: f64) -> Option<f64> {
        self.nearest(x, y).map(|patch| patch.plane.z(x, y))
    }
}

#[derive(Debug, Clone)]
pub struct Separation {
    pub ground: Vec<bool>,
    pub surface: GroundSurface,
}

// Square grid of surface patches over the horizontal extent of the local points.
struct PatchGrid {
    min_x: f64,
    min_y: f64,
    cell_w: f64,
    cell_h: f64,
    side: usize,
}

impl PatchGrid {
    fn new(points: &[[f64; 3]]) -> Self {
        let (min_x, min_y, max_x, max_y) = bounds(points.iter());
        let side = ((points.len() / POINTS_PER_PATCH) as f64)
            .sqrt()
            .floor()
            .clamp(1.0, MAX_PATCHES_PER_SIDE as f64) as usize;
        let cell = |extent: f64| {
            if extent > 0.0 {
                extent / side as f64
            } else {
                1.0
            }
        };
        Self {
            min_x,
            min_y,
            cell_w: cell(max_x - min_x),
            cell_h: cell(max_y - min_y),
            side,
        }
    }

    fn len(&self) -> usize {
        self.side * self.side
    }

    fn col_row(&self, index: usize) -> (usize, usize) {
        (index % self.side, index / self.side)
    }

    fn patch_of(&self, p: &[f64; 3]) -> usize {
        let col = grid_cell(p[0] - self.min_x, self.cell_w, self.side);
        let row = grid_cell(p[1] - self.min_y, self.cell_h, self.side);
        row * self.side + col
    }

    fn origin(&self, index: usize) -> (f64, f64) {
        let (col, row) = self.col_row(index);
        (
            self.min_x + col as f64 * self.cell_w,
            self.min_y + row as f64 * self.cell_h,
        )
    }

    fn center(&self, index: usize) -> (f64, f64) {
        let (x, y) = self.origin(index);
        (x + self.cell_w / 2.0, y + self.cell_h / 2.0)
    }

    fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let (col, row) = self.col_row(index);
        let side = self.side as isize;
        (-1isize..=1)
            .flat_map(move |dr| (-1isize..=1).map(move |dc| (dc, dr)))
            .filter(|&offset| offset != (0, 0))
            .filter_map(move |(dc, dr)| {
                let (c, r) = (col as isize + dc, row as isize + dr);
                (c >= 0 && r >= 0 && c < side && r < side).then(|| (r * side + c) as usize)
            })
    }
}

fn grid_cell(offset: f64, cell: f64, count: usize) -> usize {
    ((offset / cell).floor().max(0.0) as usize).min(count - 1)
}

fn bounds<'a>(points: impl Iterator<Item = &'a [f64; 3]>) -> (f64, f64, f64, f64) {
    points.fold(
        (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
        |(min_x, min_y, max_x, max_y), p| {
            (min_x.min(p[0]), min_y.min(p[1]), max_x.max(p[0]), max_y.max(p[1]))
        },
    )
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

// Index of the closest center; ties go to the lowest index.
fn nearest_by_center(
    centers: impl Iterator<Item = (f64, f64)>,
    target: (f64, f64),
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, center) in centers.enumerate() {
        let d = distance(center, target);
        if best.map_or(true, |(_, best_d)| d < best_d) {
            best = Some((index, d));
        }
    }
    best.map(|(index, _)| index)
}

/// Lowest point of each cell of a 3x3 sub-grid laid over `origin..origin + size`.
fn lowest_seeds(
    points: &[[f64; 3]],
    members: &[usize],
    origin: (f64, f64),
    size: (f64, f64),
) -> Vec<usize> {
    let mut lowest: [Option<usize>; 9] = [None; 9];
    for &i in members {
        let p = &points[i];
        let col = grid_cell(p[0] - origin.0, size.0 / 3.0, 3);
        let row = grid_cell(p[1] - origin.1, size.1 / 3.0, 3);
        let slot = &mut lowest[row * 3 + col];
        if slot.map_or(true, |j| p[2] < points[j][2]) {
            *slot = Some(i);
        }
    }
    lowest.into_iter().flatten().collect()
}

/// Fits a plane to the seeds, trimming the worst seed while it lies outside the band.
fn fit_seeds(
    points: &[[f64; 3]],
    seeds: &mut Vec<usize>,
    thickness: f64,
) -> Result<Option<Plane>, TileFitError> {
    let Some(mut plane) = fit_plane(seeds.iter().map(|&i| &points[i]))? else {
        return Ok(None);
    };

    while seeds.len() > MIN_SEEDS {
        let mut worst = (0, 0.0);
        for (position, &i) in seeds.iter().enumerate() {
            let residual = plane.residual(&points[i]).abs();
            if residual > worst.1 {
                worst = (position, residual);
            }
        }
        if worst.1 <= thickness {
            break;
        }
        seeds.remove(worst.0);
        match fit_plane(seeds.iter().map(|&i| &points[i]))? {
            Some(refit) => plane = refit,
            None => break,
        }
    }

    Ok(Some(plane))
}

struct Surface {
    // grid patch the surface was fitted on; `None` for the whole-tile fallback
    home: Option<usize>,
    center: (f64, f64),
    plane: Plane,
}

/// Splits `points` into ground and nonground.
///
/// Returns `Ok(None)` when `cancel` is raised.
pub fn separate(
    points: &[[f64; 3]],
    params: &GroundParams,
    cancel: &AtomicBool,
) -> Result<Option<Separation>, TileFitError> {
    let n = points.len();
    let grid = PatchGrid::new(points);

    let mut members = vec![Vec::new(); grid.len()];
    let point_patch: Vec<usize> = points.iter().map(|p| grid.patch_of(p)).collect();
    for (i, &patch) in point_patch.iter().enumerate() {
        members[patch].push(i);
    }

    // seed fit per patch
    let mut fits: Vec<Option<Plane>> = Vec::with_capacity(grid.len());
    for (index, patch_members) in members.iter().enumerate() {
        let mut seeds = lowest_seeds(
            points,
            patch_members,
            grid.origin(index),
            (grid.cell_w, grid.cell_h),
        );
        fits.push(fit_seeds(points, &mut seeds, params.thickness)?);
    }

    let mut surfaces = if fits.iter().all(Option::is_none) {
        let all: Vec<usize> = (0..n).collect();
        let (min_x, min_y, max_x, max_y) = bounds(points.iter());
        let mut seeds = lowest_seeds(
            points,
            &all,
            (min_x, min_y),
            ((max_x - min_x).max(f64::MIN_POSITIVE), (max_y - min_y).max(f64::MIN_POSITIVE)),
        );
        let plane = fit_seeds(points, &mut seeds, params.thickness)?
            .ok_or(TileFitError::Degenerate { points: n })?;
        if plane.gradient() <= params.max_gradient {
            vec![Surface {
                home: None,
                center: ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0),
                plane,
            }]
        } else {
            Vec::new()
        }
    } else {
        grow_ground_patches(&grid, &fits, params)
            .into_iter()
            .filter_map(|index| {
                fits[index].map(|plane| Surface {
                    home: Some(index),
                    center: grid.center(index),
                    plane,
                })
            })
            .collect()
    };

    // judge every patch against its own surface or the nearest one
    let patch_surface: Vec<Option<usize>> = (0..grid.len())
        .map(|index| {
            surfaces
                .iter()
                .position(|surface| surface.home == Some(index))
                .or_else(|| {
                    nearest_by_center(surfaces.iter().map(|s| s.center), grid.center(index))
                })
        })
        .collect();
    let point_surface: Vec<Option<usize>> =
        point_patch.iter().map(|&patch| patch_surface[patch]).collect();
    let mut surface_members = vec![Vec::new(); surfaces.len()];
    for (i, surface) in point_surface.iter().enumerate() {
        if let Some(s) = surface {
            surface_members[*s].push(i);
        }
    }

    let mut ground = vec![false; n];
    for iteration in 0..MAX_ITERATIONS {
        let mut changed = false;
        for i in 0..n {
            if cancel.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let is_ground = point_surface[i].map_or(false, |s| {
                surfaces[s].plane.residual(&points[i]).abs() <= params.thickness
            });
            if is_ground != ground[i] {
                ground[i] = is_ground;
                changed = true;
            }
        }
        if !changed && iteration > 0 {
            break;
        }

        for (surface, members) in surfaces.iter_mut().zip(surface_members.iter()) {
            let home = surface.home;
            let refit = fit_plane(members.iter().filter_map(|&i| {
                let own = home.map_or(true, |home| point_patch[i] == home);
                (ground[i] && own).then(|| &points[i])
            }))?;
            if let Some(plane) = refit {
                if plane.gradient() <= params.max_gradient {
                    surface.plane = plane;
                }
            }
        }
    }

    // reject rough patches in full
    for (surface, members) in surfaces.iter().zip(surface_members.iter()) {
        let residuals: Vec<f64> = members
            .iter()
            .filter(|&&i| ground[i])
            .map(|&i| surface.plane.residual(&points[i]))
            .collect();
        if residuals.len() < MIN_SEEDS {
            continue;
        }
        let rms = (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt();
        if smoothness(rms, params.thickness) < params.min_smoothness {
            log::debug!("rejecting rough ground patch at {:?} (rms {:.4})", surface.center, rms);
            for &i in members {
                ground[i] = false;
            }
        }
    }

    let surface = GroundSurface {
        patches: surfaces
            .into_iter()
            .map(|surface| SurfacePatch {
                center: surface.center,
                plane: surface.plane,
            })
            .collect(),
    };
    Ok(Some(Separation { ground, surface }))
}

/// Grid patches accepted as ground, grown from the lowest valid patch.
fn grow_ground_patches(grid: &PatchGrid, fits: &[Option<Plane>], params: &GroundParams) -> Vec<usize> {
    let candidate: Vec<bool> = fits
        .iter()
        .map(|fit| fit.map_or(false, |plane| plane.gradient() <= params.max_gradient))
        .collect();
    let center_z: Vec<f64> = (0..grid.len())
        .map(|index| {
            let (x, y) = grid.center(index);
            fits[index].map_or(f64::MAX, |plane| plane.z(x, y))
        })
        .collect();

    let Some(lowest) = (0..grid.len())
        .filter(|&index| candidate[index])
        .fold(None, |best: Option<usize>, index| match best {
            Some(b) if center_z[b] <= center_z[index] => Some(b),
            _ => Some(index),
        })
    else {
        return Vec::new();
    };

    let reachable = |from: usize, to: usize| -> bool {
        let Some(plane) = fits[from] else {
            return false;
        };
        let (x, y) = grid.center(to);
        let rise = center_z[to] - plane.z(x, y);
        rise <= params.thickness + params.max_gradient * distance(grid.center(from), (x, y))
    };

    let mut accepted = vec![false; grid.len()];
    accepted[lowest] = true;

    // connected growth first
    loop {
        let mut changed = false;
        for index in 0..grid.len() {
            if !candidate[index] || accepted[index] {
                continue;
            }
            if grid
                .neighbors(index)
                .any(|neighbor| accepted[neighbor] && reachable(neighbor, index))
            {
                accepted[index] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // then islands cut off by elevated patches
    loop {
        let mut changed = false;
        for index in 0..grid.len() {
            if !candidate[index] || accepted[index] {
                continue;
            }
            let accepted_patches: Vec<usize> = (0..grid.len()).filter(|&i| accepted[i]).collect();
            let nearest = nearest_by_center(
                accepted_patches.iter().map(|&i| grid.center(i)),
                grid.center(index),
            )
            .map(|k| accepted_patches[k]);
            if nearest.map_or(false, |from| reachable(from, index)) {
                accepted[index] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    (0..grid.len()).filter(|&index| accepted[index]).collect()
}
