use std::{collections::BTreeMap, ops::Range};

use pcd_core::pointcloud::{classification::Classification, point::Point};

use crate::naming::{sequence_digits, Sequence};

/// Points of one batch, always in store order.
#[derive(Debug, Clone, Copy)]
pub enum BatchPoints<'a> {
    /// A run of consecutive store points starting at `start`.
    Contiguous { start: usize, points: &'a [Point] },
    /// Scattered store points, by ascending store index.
    Selected {
        source: &'a [Point],
        indices: &'a [usize],
    },
}

impl<'a> BatchPoints<'a> {
    pub fn len(&self) -> usize {
        match self {
            BatchPoints::Contiguous { points, .. } => points.len(),
            BatchPoints::Selected { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> &'a Point {
        match *self {
            BatchPoints::Contiguous { points, .. } => &points[i],
            BatchPoints::Selected { source, indices } => &source[indices[i]],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Point> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Store index range of a contiguous batch.
    pub fn range(&self) -> Option<Range<usize>> {
        match self {
            BatchPoints::Contiguous { start, points } => Some(*start..*start + points.len()),
            BatchPoints::Selected { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    /// Set when the output is split by class.
    pub class: Option<Classification>,
    /// Set when a ceiling is in effect.
    pub sequence: Option<Sequence>,
    pub points: BatchPoints<'a>,
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Cuts a point sequence into output batches of at most `ceiling` points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputSplitter {
    ceiling: Option<usize>,
}

impl OutputSplitter {
    /// `None` (or zero) leaves the output in a single batch.
    pub fn new(ceiling: Option<usize>) -> Self {
        Self {
            ceiling: ceiling.filter(|&c| c > 0),
        }
    }

    pub fn ceiling(&self) -> Option<usize> {
        self.ceiling
    }

    /// Number of batches for `total` points.
    pub fn batch_count(&self, total: usize) -> usize {
        match self.ceiling {
            Some(ceiling) => total.div_ceil(ceiling),
            None => 1,
        }
    }

    fn sequence_for(&self, index: usize, digits: usize) -> Option<Sequence> {
        self.ceiling.map(|_| Sequence { index, digits })
    }

    /// Contiguous batches in store order. Call again to restart.
    pub fn batches<'a>(&self, points: &'a [Point]) -> impl Iterator<Item = Batch<'a>> + Clone {
        let splitter = *self;
        let count = self.batch_count(points.len());
        let digits = sequence_digits(count);
        let size = self.ceiling.unwrap_or(points.len());

        (0..count).map(move |index| {
            let start = index * size;
            let end = (start + size).min(points.len());
            Batch {
                class: None,
                sequence: splitter.sequence_for(index, digits),
                points: BatchPoints::Contiguous {
                    start,
                    points: &points[start..end],
                },
            }
        })
    }

    /// Groups the points per class, in class code order.
    pub fn split_by_class<'a>(&self, points: &'a [Point]) -> ClassSplit<'a> {
        let mut classes: BTreeMap<Classification, Vec<usize>> = BTreeMap::new();
        for (index, point) in points.iter().enumerate() {
            classes.entry(point.classification).or_default().push(index);
        }
        ClassSplit {
            splitter: *self,
            points,
            digits: sequence_digits(self.batch_count(points.len())),
            classes: classes.into_iter().collect(),
        }
    }
}

/// Per-class index lists; batches borrow from it.
#[derive(Debug, Clone)]
pub struct ClassSplit<'a> {
    splitter: OutputSplitter,
    points: &'a [Point],
    // Shared by every class so names line up across classes.
    digits: usize,
    classes: Vec<(Classification, Vec<usize>)>,
}

impl ClassSplit<'_> {
    pub fn classes(&self) -> impl Iterator<Item = (Classification, usize)> + '_ {
        self.classes
            .iter()
            .map(|(class, indices)| (*class, indices.len()))
    }

    pub fn batches(&self) -> impl Iterator<Item = Batch<'_>> + '_ {
        self.classes.iter().flat_map(move |(class, indices)| {
            let size = self.splitter.ceiling.unwrap_or(indices.len()).max(1);
            indices
                .chunks(size)
                .enumerate()
                .map(move |(index, chunk)| Batch {
                    class: Some(*class),
                    sequence: self.splitter.sequence_for(index, self.digits),
                    points: BatchPoints::Selected {
                        source: self.points,
                        indices: chunk,
                    },
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(n: usize) -> Vec<Point> {
        (0..n).map(|i| Point::new(i as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn ceiling_splits_in_order() {
        let points = points(10);
        let splitter = OutputSplitter::new(Some(4));
        let batches: Vec<Batch> = splitter.batches(&points).collect();

        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(Batch::len).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert_eq!(batches[1].points.range(), Some(4..8));
        let xs: Vec<f64> = batches
            .iter()
            .flat_map(|b| b.points.iter().map(|p| p.x))
            .collect();
        assert_eq!(xs, (0..10).map(|i| i as f64).collect::<Vec<_>>());
        assert_eq!(
            batches[2].sequence,
            Some(Sequence {
                index: 2,
                digits: 1
            })
        );
    }

    #[test]
    fn exact_multiple_has_no_short_batch() {
        let points = points(8);
        let sizes: Vec<usize> = OutputSplitter::new(Some(4))
            .batches(&points)
            .map(|b| b.len())
            .collect();
        assert_eq!(sizes, vec![4, 4]);
    }

    #[test]
    fn unlimited_is_one_batch() {
        let points = points(7);
        let batches: Vec<Batch> = OutputSplitter::new(None).batches(&points).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 7);
        assert!(batches[0].sequence.is_none());

        let empty: Vec<Batch> = OutputSplitter::new(None).batches(&[]).collect();
        assert_eq!(empty.len(), 1);
        assert!(empty[0].is_empty());

        assert_eq!(OutputSplitter::new(Some(0)), OutputSplitter::new(None));
    }

    #[test]
    fn batches_restart() {
        let points = points(5);
        let splitter = OutputSplitter::new(Some(2));
        let first = splitter.batches(&points);
        let again = first.clone();
        assert_eq!(first.count(), 3);
        assert_eq!(again.count(), 3);
    }

    #[test]
    fn class_split_keeps_store_order() {
        let mut points = points(7);
        for (i, point) in points.iter_mut().enumerate() {
            point.classification = if i % 2 == 0 {
                Classification::Ground
            } else {
                Classification::Building
            };
        }
        let split = OutputSplitter::new(Some(3)).split_by_class(&points);
        assert_eq!(
            split.classes().collect::<Vec<_>>(),
            vec![(Classification::Ground, 4), (Classification::Building, 3)]
        );

        let batches: Vec<Batch> = split.batches().collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].class, Some(Classification::Ground));
        assert_eq!(
            batches[0].points.iter().map(|p| p.x).collect::<Vec<_>>(),
            vec![0.0, 2.0, 4.0]
        );
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1].sequence.map(|s| s.index), Some(1));
        assert_eq!(batches[2].class, Some(Classification::Building));
        assert_eq!(batches[2].sequence.map(|s| s.index), Some(0));
        assert!(batches[2].points.range().is_none());
    }
}
