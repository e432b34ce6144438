use std::path::Path;

use csv::WriterBuilder;
use las::{point::Format, Builder, Transform, Vector, Writer};
use rayon::iter::{IntoParallelIterator as _, ParallelIterator as _};

use pcd_core::pointcloud::{
    classification::Classification,
    point::{Metadata, Point},
};

use crate::{error::WriteError, splitter::Batch};

/// Persists one batch to one destination.
pub trait BatchWriter: Send + Sync {
    fn write_batch(&self, batch: &Batch<'_>, destination: &Path) -> Result<(), WriteError>;
}

/// Picks the writer matching an output extension.
pub fn writer_for(extension: &str, metadata: &Metadata) -> Result<Box<dyn BatchWriter>, WriteError> {
    match extension.to_ascii_lowercase().as_str() {
        "las" | "laz" => Ok(Box::new(LasBatchWriter::new(metadata.scale, metadata.offset))),
        "csv" => Ok(Box::new(CsvBatchWriter::new(b','))),
        "txt" => Ok(Box::new(CsvBatchWriter::new(b' '))),
        other => Err(WriteError::Unsupported(format!("output extension '{}'", other))),
    }
}

/// LAS 1.4 point format 7 writer; `.laz` destinations are compressed.
#[derive(Debug, Clone)]
pub struct LasBatchWriter {
    scale: [f64; 3],
    offset: [f64; 3],
}

impl LasBatchWriter {
    pub fn new(scale: [f64; 3], offset: [f64; 3]) -> Self {
        Self { scale, offset }
    }

    // Coarsens the scale until every coordinate of the batch fits in an i32.
    fn transforms(&self, batch: &Batch<'_>) -> Vector<Transform> {
        let mut reach = [0.0_f64; 3];
        for point in batch.points.iter() {
            for (axis, value) in point.xyz().into_iter().enumerate() {
                reach[axis] = reach[axis].max((value - self.offset[axis]).abs());
            }
        }
        let [x, y, z] = [0, 1, 2].map(|axis| {
            let mut scale = if self.scale[axis] > 0.0 {
                self.scale[axis]
            } else {
                0.001
            };
            while reach[axis] / scale >= i32::MAX as f64 {
                scale *= 10.0;
            }
            Transform {
                scale,
                offset: self.offset[axis],
            }
        });
        Vector { x, y, z }
    }
}

fn to_las_point(point: &Point) -> Result<las::Point, WriteError> {
    // Overlap has its own flag in LAS 1.4 and no standard class code.
    let (code, is_overlap) = match point.classification {
        Classification::Overlap => (Classification::NonGround.code(), true),
        other => (other.code(), false),
    };
    let color = point.color.unwrap_or_default();

    Ok(las::Point {
        x: point.x,
        y: point.y,
        z: point.z,
        intensity: point.attributes.intensity,
        return_number: point.attributes.return_number,
        number_of_returns: point.attributes.number_of_returns,
        classification: las::point::Classification::new(code)?,
        is_overlap,
        scan_angle: point.attributes.scan_angle,
        user_data: point.attributes.user_data,
        point_source_id: point.attributes.point_source_id,
        gps_time: Some(point.attributes.gps_time.unwrap_or_default()),
        color: Some(las::Color::new(color.r, color.g, color.b)),
        ..Default::default()
    })
}

impl BatchWriter for LasBatchWriter {
    fn write_batch(&self, batch: &Batch<'_>, destination: &Path) -> Result<(), WriteError> {
        let start = std::time::Instant::now();
        let points = (0..batch.len())
            .into_par_iter()
            .map(|i| to_las_point(batch.points.get(i)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = Builder::from((1, 4));
        builder.point_format = Format::new(7)?;
        builder.transforms = self.transforms(batch);
        builder.generating_software = format!("pclassify {}", env!("CARGO_PKG_VERSION"));
        let header = builder.into_header()?;

        let mut writer = Writer::from_path(destination, header)?;
        for point in points {
            writer.write_point(point)?;
        }
        writer.close()?;

        log::debug!(
            "wrote {} points to {:?} in {:?}",
            batch.len(),
            destination,
            start.elapsed()
        );
        Ok(())
    }
}

/// Delimited text writer with a header row.
#[derive(Debug, Clone)]
pub struct CsvBatchWriter {
    delimiter: u8,
}

impl CsvBatchWriter {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl BatchWriter for CsvBatchWriter {
    fn write_batch(&self, batch: &Batch<'_>, destination: &Path) -> Result<(), WriteError> {
        let with_color = batch.points.iter().any(|p| p.color.is_some());
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(destination)?;

        let mut header = vec![
            "x",
            "y",
            "z",
            "intensity",
            "return_number",
            "number_of_returns",
            "classification",
        ];
        if with_color {
            header.extend(["r", "g", "b"]);
        }
        writer.write_record(&header)?;

        for point in batch.points.iter() {
            let mut record = vec![
                point.x.to_string(),
                point.y.to_string(),
                point.z.to_string(),
                point.attributes.intensity.to_string(),
                point.attributes.return_number.to_string(),
                point.attributes.number_of_returns.to_string(),
                point.classification.code().to_string(),
            ];
            if with_color {
                let color = point.color.unwrap_or_default();
                record.extend([color.r, color.g, color.b].map(|c| c.to_string()));
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
