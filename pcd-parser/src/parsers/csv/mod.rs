use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecord, Trim};

use pcd_core::{
    error::FormatError,
    pointcloud::{
        classification::Classification,
        point::{Color, Point, PointAttributes, PointCloud},
    },
};

use super::{Parser, ParserProvider};

/// Column order assumed for files without a header line.
const ATTRIBUTE_NAMES: [&str; 13] = [
    "x",
    "y",
    "z",
    "intensity",
    "return_number",
    "number_of_returns",
    "classification",
    "r",
    "g",
    "b",
    "scan_angle",
    "user_data",
    "gps_time",
];

pub struct CsvParserProvider {
    pub filenames: Vec<PathBuf>,
}

impl ParserProvider for CsvParserProvider {
    fn get_parser(&self) -> Box<dyn Parser> {
        Box::new(CsvParser {
            filenames: self.filenames.clone(),
        })
    }
}

pub struct CsvParser {
    pub filenames: Vec<PathBuf>,
}

impl Parser for CsvParser {
    fn parse(&self) -> Result<PointCloud, FormatError> {
        let mut points = Vec::new();
        for filename in &self.filenames {
            let start = std::time::Instant::now();
            read_file(filename, &mut points)?;
            log::debug!("read {:?} in {:?}", filename, start.elapsed());
        }
        Ok(PointCloud::new(points))
    }
}

fn read_file(filename: &Path, points: &mut Vec<Point>) -> Result<(), FormatError> {
    let read_error = |message: String| FormatError::Read {
        path: filename.display().to_string(),
        message,
    };

    let mut first_line = String::new();
    BufReader::new(File::open(filename)?).read_line(&mut first_line)?;
    let delimiter = detect_delimiter(&first_line);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .trim(Trim::All)
        .flexible(true)
        .from_path(filename)
        .map_err(|e| read_error(e.to_string()))?;

    let mut records = reader.records();
    let Some(first) = records.next() else {
        return Ok(());
    };
    let first = first.map_err(|e| read_error(e.to_string()))?;
    let first = compact(first, delimiter);

    let has_headers = first
        .get(0)
        .map(|field| field.parse::<f64>().is_err())
        .unwrap_or(false);
    let field_mapping = create_field_mapping(&first, has_headers).map_err(read_error)?;

    if !has_headers {
        let index = points.len();
        points.push(parse_record(&first, &field_mapping, index)?);
    }

    for record in records {
        let index = points.len();
        let record = record.map_err(|e| FormatError::Record {
            index,
            message: e.to_string(),
        })?;
        let record = compact(record, delimiter);
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        points.push(parse_record(&record, &field_mapping, index)?);
    }

    Ok(())
}

fn detect_delimiter(line: &str) -> u8 {
    if line.contains(',') {
        b','
    } else if line.contains('\t') {
        b'\t'
    } else if line.contains(';') {
        b';'
    } else {
        b' '
    }
}

// Runs of spaces separate a single column in whitespace-delimited text.
fn compact(record: StringRecord, delimiter: u8) -> StringRecord {
    if delimiter != b' ' {
        return record;
    }
    record.iter().filter(|field| !field.is_empty()).collect()
}

fn normalize(name: &str) -> String {
    name.to_lowercase().replace(['_', '-', ' '], "")
}

fn create_field_mapping(
    headers: &StringRecord,
    has_headers: bool,
) -> Result<HashMap<&'static str, usize>, String> {
    let mut mapping = HashMap::new();

    if has_headers {
        for (index, header) in headers.iter().enumerate() {
            let normalized_header = normalize(header);
            let name = ATTRIBUTE_NAMES
                .iter()
                .find(|name| normalize(name) == normalized_header)
                .copied()
                .or(match normalized_header.as_str() {
                    "red" => Some("r"),
                    "green" => Some("g"),
                    "blue" => Some("b"),
                    "class" => Some("classification"),
                    _ => None,
                });
            if let Some(name) = name {
                mapping.entry(name).or_insert(index);
            }
        }
    } else {
        for (index, name) in ATTRIBUTE_NAMES.iter().enumerate() {
            mapping.insert(*name, index);
        }
    }

    for name in ["x", "y", "z"] {
        if !mapping.contains_key(name) {
            return Err(format!("required column '{}' is missing", name));
        }
    }

    Ok(mapping)
}

fn get_field_value<'a>(
    record: &'a StringRecord,
    field_mapping: &HashMap<&'static str, usize>,
    field_name: &str,
) -> Option<&'a str> {
    field_mapping
        .get(field_name)
        .and_then(|&index| record.get(index))
        .filter(|value| !value.is_empty())
}

fn parse_optional_field<T: std::str::FromStr>(
    record: &StringRecord,
    field_mapping: &HashMap<&'static str, usize>,
    field_name: &str,
    index: usize,
) -> Result<Option<T>, FormatError> {
    match get_field_value(record, field_mapping, field_name) {
        Some(value) => value.parse::<T>().map(Some).map_err(|_| FormatError::Record {
            index,
            message: format!("failed to parse '{}' from {:?}", field_name, value),
        }),
        None => Ok(None),
    }
}

fn parse_record(
    record: &StringRecord,
    field_mapping: &HashMap<&'static str, usize>,
    index: usize,
) -> Result<Point, FormatError> {
    let mut xyz = [0.0f64; 3];
    for (value, name) in xyz.iter_mut().zip(["x", "y", "z"]) {
        *value = parse_optional_field(record, field_mapping, name, index)?.ok_or_else(|| {
            FormatError::Record {
                index,
                message: format!("missing '{}' field", name),
            }
        })?;
    }
    let [x, y, z] = xyz;
    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return Err(FormatError::NonFiniteCoordinate { index, x, y, z });
    }

    let r: Option<u16> = parse_optional_field(record, field_mapping, "r", index)?;
    let g: Option<u16> = parse_optional_field(record, field_mapping, "g", index)?;
    let b: Option<u16> = parse_optional_field(record, field_mapping, "b", index)?;
    let color = match (r, g, b) {
        (None, None, None) => None,
        (r, g, b) => Some(Color {
            r: r.unwrap_or(0),
            g: g.unwrap_or(0),
            b: b.unwrap_or(0),
        }),
    };

    let attributes = PointAttributes {
        intensity: parse_optional_field(record, field_mapping, "intensity", index)?.unwrap_or(0),
        return_number: parse_optional_field(record, field_mapping, "return_number", index)?
            .unwrap_or(1),
        number_of_returns: parse_optional_field(record, field_mapping, "number_of_returns", index)?
            .unwrap_or(1),
        scan_angle: parse_optional_field(record, field_mapping, "scan_angle", index)?
            .unwrap_or(0.0),
        user_data: parse_optional_field(record, field_mapping, "user_data", index)?.unwrap_or(0),
        point_source_id: 0,
        gps_time: parse_optional_field(record, field_mapping, "gps_time", index)?,
    };

    let classification = parse_optional_field::<u8>(record, field_mapping, "classification", index)?
        .map(Classification::from_code)
        .unwrap_or_default();

    Ok(Point {
        x,
        y,
        z,
        color,
        attributes,
        classification,
    })
}
