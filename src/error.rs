use std::fmt::Display;
use thiserror::Error;

pub type TabulaResult<T> = Result<T, TabulaError>;

#[derive(Error, Debug)]
pub enum TabulaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ambiguous or missing column metadata
    #[error("Schema error: {0}")]
    Schema(String),

    /// A single cell failed type conversion on import (row is 1-based)
    #[error("Conversion error at row {row}, column '{column}': {message}")]
    Conversion {
        row: u32,
        column: String,
        message: String,
    },

    /// Workbook or sheet level failure in the document backend
    #[error("Document error during {phase} (sheet '{sheet}'): {message}")]
    Document {
        phase: &'static str,
        sheet: String,
        message: String,
    },

    /// Output stream or file write failure
    #[error("Failed to write '{target}': {source}")]
    Resource {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Layout step requested out of order
    #[error("Layout error: {0}")]
    Layout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("export failed: {0}")]
    ExportFailed(Box<TabulaError>),
}

impl TabulaError {
    /// Wrap a backend error with the phase and sheet it happened in.
    pub fn document(phase: &'static str, sheet: impl Into<String>, err: impl Display) -> Self {
        TabulaError::Document {
            phase,
            sheet: sheet.into(),
            message: err.to_string(),
        }
    }

    pub fn conversion(row: u32, column: impl Into<String>, message: impl Into<String>) -> Self {
        TabulaError::Conversion {
            row,
            column: column.into(),
            message: message.into(),
        }
    }

    /// Row index carried by a conversion error, if any.
    pub fn row(&self) -> Option<u32> {
        match self {
            TabulaError::Conversion { row, .. } => Some(*row),
            _ => None,
        }
    }
}
