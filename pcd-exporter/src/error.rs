use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("LAS error: {0}")]
    Las(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("unsupported output: {0}")]
    Unsupported(String),
}

impl From<las::Error> for WriteError {
    fn from(error: las::Error) -> Self {
        WriteError::Las(error.to_string())
    }
}
