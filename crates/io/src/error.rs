use std::path::{Path, PathBuf};

use thiserror::Error;

/// Fatal I/O errors: a source that cannot be opened or has the wrong shape.
/// Single unreadable records are reported as problems instead.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("cannot open {}: {message}", path.display())]
    Open { path: PathBuf, message: String },

    #[error("{}: unsupported file type (expected .gpkg, .csv or .xlsx)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("{source_name}: missing column '{column}'")]
    MissingColumn { source_name: String, column: String },

    #[error("{}: layer or sheet '{name}' not found", path.display())]
    MissingLayer { path: PathBuf, name: String },

    #[error("{source_name}: {message}")]
    InvalidData { source_name: String, message: String },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("xlsx: {0}")]
    Xlsx(String),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Fs(#[from] std::io::Error),
}

impl IoError {
    pub fn open(path: &Path, message: impl ToString) -> Self {
        Self::Open { path: path.to_path_buf(), message: message.to_string() }
    }

    pub fn missing_column(source_name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::MissingColumn { source_name: source_name.into(), column: column.into() }
    }
}

impl From<rust_xlsxwriter::XlsxError> for IoError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        Self::Xlsx(e.to_string())
    }
}

impl From<calamine::Error> for IoError {
    fn from(e: calamine::Error) -> Self {
        Self::Xlsx(e.to_string())
    }
}
