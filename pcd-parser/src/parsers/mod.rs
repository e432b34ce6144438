use std::path::{Path, PathBuf};

use pcd_core::{error::FormatError, pointcloud::point::PointCloud};

pub mod csv;
pub mod las;

pub trait ParserProvider {
    fn get_parser(&self) -> Box<dyn Parser>;
}

/// Produces a point cloud whose points all have finite coordinates.
pub trait Parser {
    fn parse(&self) -> Result<PointCloud, FormatError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Las,
    Laz,
    Csv,
    Txt,
}

impl Extension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Extension::Las => "las",
            Extension::Laz => "laz",
            Extension::Csv => "csv",
            Extension::Txt => "txt",
        }
    }
}

pub fn get_extension(path: &Path) -> Result<Extension, FormatError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("las") => Ok(Extension::Las),
        Some("laz") => Ok(Extension::Laz),
        Some("csv") => Ok(Extension::Csv),
        Some("txt") => Ok(Extension::Txt),
        _ => Err(FormatError::Unsupported(path.display().to_string())),
    }
}

/// Picks the parser for a group of files sharing one extension.
pub fn provider_for(extension: Extension, filenames: Vec<PathBuf>) -> Box<dyn ParserProvider> {
    match extension {
        Extension::Las | Extension::Laz => Box::new(las::LasParserProvider { filenames }),
        Extension::Csv | Extension::Txt => Box::new(csv::CsvParserProvider { filenames }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        assert_eq!(get_extension(Path::new("a/b.LAZ")).unwrap(), Extension::Laz);
        assert_eq!(get_extension(Path::new("cloud.csv")).unwrap(), Extension::Csv);
        assert!(matches!(
            get_extension(Path::new("cloud.ply")),
            Err(FormatError::Unsupported(_))
        ));
        assert!(get_extension(Path::new("noext")).is_err());
    }
}
