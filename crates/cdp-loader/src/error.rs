//! Error types for the results loader

use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Error types for the load-and-swap pipeline
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database unreachable after {attempts} attempts: {source}")]
    Connectivity {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("Export retrieval failed: {0}")]
    Retrieval(String),

    #[error("Required file missing from export archive: {0}")]
    MissingFile(String),

    #[error("Bulk copy rejected: {0}")]
    Ingestion(String),

    #[error("Table swap failed, previous live tables left in place: {0}")]
    Swap(#[source] sqlx::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for LoaderError {
    fn from(err: reqwest::Error) -> Self {
        LoaderError::Retrieval(err.to_string())
    }
}

impl From<csv::Error> for LoaderError {
    fn from(err: csv::Error) -> Self {
        LoaderError::Transform(err.to_string())
    }
}
