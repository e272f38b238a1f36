//! Error types for ingestion and analysis.
//!
//! There are two layers:
//!
//! - [`ProcessingError`] covers everything that aborts an operation
//!   (unreadable files, missing columns, store failures, bad requests).
//! - [`RowError`] covers the row-scoped causes the ingestion loop is allowed
//!   to absorb. Anything else raised while processing a row propagates.
//!
//! Errors serialize as `{code, message}` so they can be handed to a
//! frontend or written into a JSON result unchanged.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// Row-scoped failure absorbed by the ingestion loop when
/// `skip_invalid_rows` is enabled.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("Location '{0}' not found and auto-creation is disabled")]
    UnknownLocation(String),

    #[error("Pollutant type '{0}' not found")]
    UnknownPollutant(String),

    #[error("Concentration cannot be negative: {0}")]
    NegativeConcentration(f64),

    #[error("Invalid concentration value: {0}")]
    InvalidConcentration(String),

    #[error("Invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

/// The main error type for the processing library.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// File extension is neither CSV nor a spreadsheet.
    #[error("Unsupported file format '{0}'. Please upload a CSV or Excel file")]
    UnsupportedFormat(String),

    /// File could not be parsed into a table.
    #[error("Could not read '{path}': {reason}")]
    UnreadableFile { path: String, reason: String },

    /// File exceeds the configured size limit.
    #[error("File size {size} bytes exceeds the limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// Required canonical fields could not be matched to any column.
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A row-scoped error promoted to fatal because rows may not be skipped.
    #[error("Row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: RowError,
    },

    /// The persistence collaborator rejected an operation.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Analysis request is malformed (not merely short on data).
    #[error("Invalid analysis request: {0}")]
    InvalidRequest(String),

    /// An upload log may only be finalized once.
    #[error("Upload log {0} has already been finalized")]
    AlreadyFinalized(uuid::Uuid),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Spreadsheet decoding error.
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ProcessingError>,
    },
}

impl ProcessingError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ProcessingError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code for callers that branch on the kind of failure.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Self::UnreadableFile { .. } => "UNREADABLE_FILE",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::MissingColumns(_) => "MISSING_COLUMNS",
            Self::Row { .. } => "ROW_REJECTED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::AlreadyFinalized(_) => "ALREADY_FINALIZED",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Spreadsheet(_) => "SPREADSHEET_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Whether the error is structural, i.e. it is detected before any row
    /// is processed and leaves no records behind.
    pub fn is_structural(&self) -> bool {
        match self {
            Self::UnsupportedFormat(_)
            | Self::UnreadableFile { .. }
            | Self::FileTooLarge { .. }
            | Self::MissingColumns(_)
            | Self::Spreadsheet(_) => true,
            Self::WithContext { source, .. } => source.is_structural(),
            _ => false,
        }
    }
}

impl Serialize for ProcessingError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("ProcessingError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for processing operations.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ProcessingError::Polars(e).with_context(context))
    }
}
