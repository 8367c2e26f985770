//! Ledger entries
//!
//! One ingestion entry per document path, one transformation entry per
//! (source schema, target table, kind). Both are upserted after every
//! attempt; the idempotent skip rule is [`IngestionRecord::is_current`] /
//! [`TransformationRecord::is_current`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EtlError;

/// Outcome of the last ingestion of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    Error,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl FromStr for IngestStatus {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(EtlError::Store(format!("Unknown ingestion status: {}", other))),
        }
    }
}

/// Ingestion ledger row
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionRecord {
    pub file_path: String,
    pub file_hash: String,
    pub schema_name: String,
    pub table_name: String,
    pub row_count: i64,
    pub status: IngestStatus,
    pub error_message: Option<String>,
    /// Set by the ledger on write
    pub updated_at: Option<NaiveDateTime>,
}

impl IngestionRecord {
    /// Successful import of `row_count` rows
    pub fn success(
        file_path: &str,
        file_hash: &str,
        schema_name: &str,
        table_name: &str,
        row_count: i64,
    ) -> Self {
        Self {
            file_path: file_path.to_string(),
            file_hash: file_hash.to_string(),
            schema_name: schema_name.to_string(),
            table_name: table_name.to_string(),
            row_count,
            status: IngestStatus::Success,
            error_message: None,
            updated_at: None,
        }
    }

    /// Failed import; row count is always 0
    pub fn failure(
        file_path: &str,
        file_hash: &str,
        schema_name: &str,
        table_name: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.to_string(),
            file_hash: file_hash.to_string(),
            schema_name: schema_name.to_string(),
            table_name: table_name.to_string(),
            row_count: 0,
            status: IngestStatus::Error,
            error_message: Some(message.into()),
            updated_at: None,
        }
    }

    /// Same bytes were already imported successfully
    pub fn is_current(&self, fingerprint: &str) -> bool {
        self.status == IngestStatus::Success && self.file_hash == fingerprint
    }
}

/// Kind of silver transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Fusion,
    Copy,
}

impl TransformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fusion => "fusion",
            Self::Copy => "copy",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformKind {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fusion" => Ok(Self::Fusion),
            "copy" => Ok(Self::Copy),
            other => Err(EtlError::Store(format!("Unknown transformation type: {}", other))),
        }
    }
}

/// Transformation state machine: `InProgress → {Success, Error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformStatus {
    InProgress,
    Success,
    Error,
}

impl TransformStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl FromStr for TransformStatus {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(EtlError::Store(format!("Unknown transformation status: {}", other))),
        }
    }
}

/// Unique key of a transformation ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformationKey {
    pub source_schema: String,
    pub target_table: String,
    pub kind: TransformKind,
}

impl TransformationKey {
    pub fn new(source_schema: &str, target_table: &str, kind: TransformKind) -> Self {
        Self {
            source_schema: source_schema.to_string(),
            target_table: target_table.to_string(),
            kind,
        }
    }
}

impl fmt::Display for TransformationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.kind, self.source_schema, self.target_table)
    }
}

/// Transformation ledger row
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationRecord {
    pub key: TransformationKey,
    pub source_tables: Vec<String>,
    pub target_schema: String,
    pub source_hash: Option<String>,
    pub row_count: i64,
    pub status: TransformStatus,
    pub error_message: Option<String>,
    /// Set by the ledger on write
    pub updated_at: Option<NaiveDateTime>,
}

impl TransformationRecord {
    /// Target is up to date with sources fingerprinted as `fingerprint`
    pub fn is_current(&self, fingerprint: &str) -> bool {
        self.status == TransformStatus::Success
            && self.source_hash.as_deref() == Some(fingerprint)
    }

    /// Source tables as stored: comma-delimited
    pub fn source_tables_joined(&self) -> String {
        self.source_tables.join(",")
    }

    /// Inverse of [`Self::source_tables_joined`]
    pub fn split_source_tables(joined: &str) -> Vec<String> {
        joined
            .split(',')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}
