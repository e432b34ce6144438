use std::path::PathBuf;

use las::Reader;

use pcd_core::{
    error::FormatError,
    pointcloud::{
        classification::Classification,
        point::{Color, Point, PointAttributes, PointCloud},
    },
};

use super::{Parser, ParserProvider};

pub struct LasParserProvider {
    pub filenames: Vec<PathBuf>,
}

impl ParserProvider for LasParserProvider {
    fn get_parser(&self) -> Box<dyn Parser> {
        Box::new(LasParser {
            filenames: self.filenames.clone(),
        })
    }
}

pub struct LasParser {
    pub filenames: Vec<PathBuf>,
}

impl Parser for LasParser {
    fn parse(&self) -> Result<PointCloud, FormatError> {
        let mut points = Vec::new();
        let mut scale = [f64::MAX; 3];
        let mut offset = [f64::MAX; 3];

        for filename in &self.filenames {
            let start = std::time::Instant::now();
            let read_error = |message: String| FormatError::Read {
                path: filename.display().to_string(),
                message,
            };

            let mut reader = Reader::from_path(filename).map_err(|e| read_error(e.to_string()))?;

            let transforms = reader.header().transforms();
            for (axis, transform) in [transforms.x, transforms.y, transforms.z]
                .into_iter()
                .enumerate()
            {
                scale[axis] = scale[axis].min(transform.scale);
                offset[axis] = offset[axis].min(transform.offset);
            }

            for las_point in reader.points() {
                let index = points.len();
                let las_point = las_point.map_err(|e| FormatError::Record {
                    index,
                    message: e.to_string(),
                })?;
                let point = convert_point(&las_point);
                if !point.is_finite() {
                    return Err(FormatError::NonFiniteCoordinate {
                        index,
                        x: point.x,
                        y: point.y,
                        z: point.z,
                    });
                }
                points.push(point);
            }
            log::debug!("read {:?} in {:?}", filename, start.elapsed());
        }

        let cloud = PointCloud::new(points);
        if self.filenames.is_empty() {
            return Ok(cloud);
        }
        Ok(cloud.with_scale(scale, offset))
    }
}

fn convert_point(las_point: &las::Point) -> Point {
    let classification = if las_point.is_overlap {
        Classification::Overlap
    } else {
        Classification::from_code(u8::from(las_point.classification))
    };

    let attributes = PointAttributes {
        intensity: las_point.intensity,
        return_number: las_point.return_number,
        number_of_returns: las_point.number_of_returns,
        scan_angle: las_point.scan_angle,
        user_data: las_point.user_data,
        point_source_id: las_point.point_source_id,
        gps_time: las_point.gps_time,
    };

    Point {
        x: las_point.x,
        y: las_point.y,
        z: las_point.z,
        color: las_point.color.map(|c| Color {
            r: c.red,
            g: c.green,
            b: c.blue,
        }),
        attributes,
        classification,
    }
}
