use std::path::{Path, PathBuf};

use pcd_core::pointcloud::classification::Classification;

use crate::error::WriteError;

/// Position of a batch in its sequence, with the zero padding shared by the whole export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    pub index: usize,
    pub digits: usize,
}

/// Digits needed for the largest sequence number of `batch_count` batches (at least one).
pub fn sequence_digits(batch_count: usize) -> usize {
    let mut largest = batch_count.saturating_sub(1);
    let mut digits = 1;
    while largest >= 10 {
        largest /= 10;
        digits += 1;
    }
    digits
}

/// Destination name `<stem>[-<class>][-<seq>].<ext>` next to the requested output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputName {
    parent: PathBuf,
    stem: String,
    extension: String,
}

impl OutputName {
    pub fn parse(output: &Path) -> Result<Self, WriteError> {
        let unsupported = || WriteError::Unsupported(output.display().to_string());
        let stem = output
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(unsupported)?;
        let extension = output
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(unsupported)?;

        Ok(Self {
            parent: output.parent().map(Path::to_path_buf).unwrap_or_default(),
            stem: stem.to_string(),
            extension: extension.to_ascii_lowercase(),
        })
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn parent(&self) -> &Path {
        &self.parent
    }

    pub fn path(&self, class: Option<Classification>, sequence: Option<Sequence>) -> PathBuf {
        let mut name = self.stem.clone();
        if let Some(class) = class {
            name.push('-');
            name.push_str(class.name());
        }
        if let Some(Sequence { index, digits }) = sequence {
            name.push_str(&format!("-{:0width$}", index, width = digits));
        }
        name.push('.');
        name.push_str(&self.extension);
        self.parent.join(name)
    }
}
