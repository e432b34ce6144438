use rayon::iter::{IntoParallelRefIterator as _, ParallelIterator as _};

use pcd_core::{error::ConfigError, pointcloud::point::Point};

/// Horizontal axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds2D {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds2D {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Closed containment test against the rectangle grown by `margin` on every side.
    pub fn contains_with_margin(&self, x: f64, y: f64, margin: f64) -> bool {
        x >= self.min_x - margin
            && x <= self.max_x + margin
            && y >= self.min_y - margin
            && y <= self.max_y + margin
    }
}

/// One cell of the tile grid: a footprint and the indices of the points inside it.
#[derive(Debug, Clone)]
pub struct Tile {
    pub index: usize,
    pub col: usize,
    pub row: usize,
    pub bounds: Bounds2D,
    /// Points owned by this tile, ascending.
    pub points: Vec<usize>,
    /// Points of neighbouring tiles within the overlap margin, ascending. Read only.
    pub context: Vec<usize>,
}

impl Tile {
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Owned points first, then context points.
    pub fn local_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.points.iter().chain(self.context.iter()).copied()
    }
}

/// Tiles in row-major order, row 0 at the minimum y.
#[derive(Debug, Clone)]
pub struct TileGrid {
    pub origin: [f64; 2],
    pub tile_size: f64,
    pub cols: usize,
    pub rows: usize,
    pub tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile_at(&self, col: usize, row: usize) -> Option<&Tile> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        self.tiles.get(row * self.cols + col)
    }

    pub fn point_count(&self) -> usize {
        self.tiles.iter().map(Tile::point_count).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tiler {
    tile_size: f64,
    overlap: f64,
}

impl Tiler {
    pub fn new(tile_size: f64) -> Result<Self, ConfigError> {
        if !(tile_size.is_finite() && tile_size > 0.0) {
            return Err(ConfigError::TileSize(tile_size));
        }
        Ok(Self {
            tile_size,
            overlap: 0.0,
        })
    }

    pub fn with_overlap(mut self, overlap: f64) -> Result<Self, ConfigError> {
        if !(overlap.is_finite() && overlap >= 0.0) {
            return Err(ConfigError::Overlap(overlap));
        }
        self.overlap = overlap;
        Ok(self)
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    pub fn overlap(&self) -> f64 {
        self.overlap
    }

    pub fn tile(&self, points: &[Point]) -> TileGrid {
        let (min_x, min_y, max_x, max_y) = points.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(min_x, min_y, max_x, max_y), p| {
                (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y))
            },
        );
        let (origin, width, height) = if points.is_empty() {
            ([0.0, 0.0], 0.0, 0.0)
        } else {
            ([min_x, min_y], max_x - min_x, max_y - min_y)
        };

        let cols = cell_count(width, self.tile_size);
        let rows = cell_count(height, self.tile_size);

        let mut tiles: Vec<Tile> = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (col, row)))
            .enumerate()
            .map(|(index, (col, row))| Tile {
                index,
                col,
                row,
                bounds: Bounds2D {
                    min_x: origin[0] + col as f64 * self.tile_size,
                    min_y: origin[1] + row as f64 * self.tile_size,
                    max_x: origin[0] + (col + 1) as f64 * self.tile_size,
                    max_y: origin[1] + (row + 1) as f64 * self.tile_size,
                },
                points: Vec::new(),
                context: Vec::new(),
            })
            .collect();

        // calc cell per point
        let cells: Vec<(usize, usize)> = points
            .par_iter()
            .map(|p| {
                (
                    cell_of(p.x - origin[0], self.tile_size, cols),
                    cell_of(p.y - origin[1], self.tile_size, rows),
                )
            })
            .collect();

        // bucketing in point order keeps every index list ascending
        for (index, &(col, row)) in cells.iter().enumerate() {
            tiles[row * cols + col].points.push(index);
        }

        if self.overlap > 0.0 && tiles.len() > 1 {
            for (index, (point, &(col, row))) in points.iter().zip(cells.iter()).enumerate() {
                let col_range = cell_range(point.x - origin[0], self.overlap, self.tile_size, cols);
                let row_range = cell_range(point.y - origin[1], self.overlap, self.tile_size, rows);
                for r in row_range.0..=row_range.1 {
                    for c in col_range.0..=col_range.1 {
                        if (c, r) == (col, row) {
                            continue;
                        }
                        let tile = &mut tiles[r * cols + c];
                        if tile.bounds.contains_with_margin(point.x, point.y, self.overlap) {
                            tile.context.push(index);
                        }
                    }
                }
            }
        }

        TileGrid {
            origin,
            tile_size: self.tile_size,
            cols,
            rows,
            tiles,
        }
    }
}

fn cell_count(extent: f64, edge: f64) -> usize {
    ((extent / edge).ceil() as usize).max(1)
}

fn cell_of(offset: f64, edge: f64, count: usize) -> usize {
    ((offset / edge).floor().max(0.0) as usize).min(count - 1)
}

fn cell_range(offset: f64, margin: f64, edge: f64, count: usize) -> (usize, usize) {
    (
        cell_of(offset - margin, edge, count),
        cell_of(offset + margin, edge, count),
    )
}
