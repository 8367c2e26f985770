//! Common error types for the reference-data pipeline

use thiserror::Error;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the pipeline crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (identifier, table definition, document path)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Required silver tables still missing after the readiness polling budget
    #[error("Required tables missing: {}", .0.join(", "))]
    NotReady(Vec<String>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
