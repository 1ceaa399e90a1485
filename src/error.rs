use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid date: {0:?}")]
pub struct DateDecodeError(pub String);

/// Failures reported by the storage collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

/// Fatal ingestion failures. Per-line problems never surface here.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse source: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Client errors for single-record turn creation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("malformed payload: {0}")]
    Malformed(String),
}
