//! Error types for dref-etl
//!
//! Every pipeline unit (one document, one fusion, one copy) returns
//! [`EtlResult`]. Failures are caught at the unit boundary, written to the
//! ledger and collected in a batch report; only connectivity and
//! configuration errors stop a run.

use thiserror::Error;

/// Pipeline unit error
#[derive(Debug, Error)]
pub enum EtlError {
    /// dref-common error (configuration, bootstrap, readiness)
    #[error(transparent)]
    Common(#[from] dref_common::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Document is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Table definition failed validation before any DDL was issued
    #[error("Invalid table definition: {0}")]
    InvalidTable(String),

    /// Table exists in the catalog but cannot be read
    #[error("Table {table} is not accessible: {reason}")]
    Inaccessible { table: String, reason: String },

    /// One-statement bulk transfer failed
    #[error("Bulk copy into {table} failed: {reason}")]
    BulkCopy { table: String, reason: String },

    /// Nothing to build a target table from
    #[error("No columns found for {0}")]
    NoColumns(String),

    /// Storage backend failure outside sqlx (in-memory store, missing table)
    #[error("Store error: {0}")]
    Store(String),
}

/// Result type for pipeline units
pub type EtlResult<T> = Result<T, EtlError>;
