use std::{fs, ops::Range, path::Path, path::PathBuf, time::Instant};

use pcd_core::pointcloud::{classification::Classification, store::PointStore};

use crate::{
    error::WriteError,
    naming::OutputName,
    splitter::{Batch, OutputSplitter},
    writer::{writer_for, BatchWriter},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Points per file; `None` writes everything to one file (per class).
    pub points_per_file: Option<usize>,
    pub split_by_class: bool,
    /// Stop at the first failed batch instead of attempting the rest.
    pub fail_fast: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub destination: PathBuf,
    pub class: Option<Classification>,
    /// Store index range; only for contiguous batches.
    pub range: Option<Range<usize>>,
    pub point_count: usize,
}

impl BatchRecord {
    fn new(batch: &Batch<'_>, destination: PathBuf) -> Self {
        Self {
            destination,
            class: batch.class,
            range: batch.points.range(),
            point_count: batch.len(),
        }
    }
}

#[derive(Debug)]
pub struct BatchFailure {
    pub batch: BatchRecord,
    pub error: WriteError,
}

#[derive(Debug, Default)]
pub struct ExportReport {
    /// Batches written successfully.
    pub written: Vec<BatchRecord>,
    pub failures: Vec<BatchFailure>,
    /// Set when fail-fast cut the export short.
    pub aborted: bool,
}

impl ExportReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn points_written(&self) -> usize {
        self.written.iter().map(|b| b.point_count).sum()
    }
}

/// Writes the store next to `output`, picking the writer from its extension.
///
/// Only setup problems (unusable output name, missing directory) are returned as
/// errors; per-batch failures are collected in the report.
pub fn export(
    store: &PointStore,
    output: &Path,
    options: &ExportOptions,
) -> Result<ExportReport, WriteError> {
    let name = OutputName::parse(output)?;
    let writer = writer_for(name.extension(), store.metadata())?;
    export_with(store, &name, writer.as_ref(), options)
}

pub fn export_with(
    store: &PointStore,
    name: &OutputName,
    writer: &dyn BatchWriter,
    options: &ExportOptions,
) -> Result<ExportReport, WriteError> {
    if !name.parent().as_os_str().is_empty() {
        fs::create_dir_all(name.parent())?;
    }

    let start = Instant::now();
    let splitter = OutputSplitter::new(options.points_per_file);
    let points = store.points();
    let mut report = ExportReport::default();

    let mut write = |batch: Batch<'_>| -> bool {
        let destination = name.path(batch.class, batch.sequence);
        let record = BatchRecord::new(&batch, destination);
        match writer.write_batch(&batch, &record.destination) {
            Ok(()) => {
                log::info!(
                    "wrote {} points to {:?}",
                    record.point_count,
                    record.destination
                );
                report.written.push(record);
                true
            }
            Err(error) => {
                log::warn!("failed to write {:?}: {}", record.destination, error);
                report.failures.push(BatchFailure {
                    batch: record,
                    error,
                });
                !options.fail_fast
            }
        }
    };

    let completed = if options.split_by_class {
        let split = splitter.split_by_class(points);
        let completed = split.batches().all(&mut write);
        completed
    } else {
        splitter.batches(points).all(&mut write)
    };
    report.aborted = !completed;

    log::info!(
        "finish exporting {} files in {:?} ({} failed)",
        report.written.len(),
        start.elapsed(),
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pcd_core::pointcloud::point::{Point, PointCloud};

    use super::*;

    // Remembers destinations and fails the ones listed.
    struct RecordingWriter {
        fail: Vec<usize>,
        calls: Mutex<Vec<(PathBuf, usize)>>,
    }

    impl BatchWriter for RecordingWriter {
        fn write_batch(&self, batch: &Batch<'_>, destination: &Path) -> Result<(), WriteError> {
            let mut calls = self.calls.lock().unwrap();
            let call = calls.len();
            calls.push((destination.to_path_buf(), batch.len()));
            if self.fail.contains(&call) {
                return Err(WriteError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    fn store(n: usize) -> PointStore {
        let points = (0..n).map(|i| Point::new(i as f64, 0.0, 0.0)).collect();
        let mut store = PointStore::new();
        store.load(PointCloud::new(points)).unwrap();
        store
    }

    fn writer(fail: Vec<usize>) -> RecordingWriter {
        RecordingWriter {
            fail,
            calls: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn later_batches_survive_a_failure() {
        let writer = writer(vec![1]);
        let name = OutputName::parse(Path::new("out.las")).unwrap();
        let options = ExportOptions {
            points_per_file: Some(4),
            ..Default::default()
        };
        let report = export_with(&store(10), &name, &writer, &options).unwrap();

        assert_eq!(writer.calls.lock().unwrap().len(), 3);
        assert_eq!(report.written.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.aborted);
        let failed = &report.failures[0].batch;
        assert_eq!(failed.destination, PathBuf::from("out-1.las"));
        assert_eq!(failed.range, Some(4..8));
        assert_eq!(report.points_written(), 6);
    }

    #[test]
    fn fail_fast_stops_at_first_failure() {
        let writer = writer(vec![0]);
        let name = OutputName::parse(Path::new("out.las")).unwrap();
        let options = ExportOptions {
            points_per_file: Some(4),
            fail_fast: true,
            ..Default::default()
        };
        let report = export_with(&store(10), &name, &writer, &options).unwrap();

        assert_eq!(writer.calls.lock().unwrap().len(), 1);
        assert!(report.aborted);
        assert!(report.written.is_empty());
        assert!(!report.is_success());
    }

    #[test]
    fn unlimited_writes_single_file() {
        let writer = writer(vec![]);
        let name = OutputName::parse(Path::new("cloud.csv")).unwrap();
        let report =
            export_with(&store(0), &name, &writer, &ExportOptions::default()).unwrap();

        assert!(report.is_success());
        assert_eq!(
            *writer.calls.lock().unwrap(),
            vec![(PathBuf::from("cloud.csv"), 0)]
        );
    }
}
