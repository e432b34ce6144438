pub mod error;
pub mod export;
pub mod naming;
pub mod splitter;
pub mod writer;

pub use error::WriteError;
pub use export::{export, export_with, BatchFailure, BatchRecord, ExportOptions, ExportReport};
pub use splitter::{Batch, BatchPoints, ClassSplit, OutputSplitter};
pub use writer::{writer_for, BatchWriter, CsvBatchWriter, LasBatchWriter};
