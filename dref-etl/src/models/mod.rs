//! Data models for the pipeline

pub mod ledger;
pub mod report;
pub mod table;

pub use ledger::{
    IngestStatus, IngestionRecord, TransformKind, TransformStatus, TransformationKey,
    TransformationRecord,
};
pub use report::{
    BatchReport, IngestMode, IngestOutcome, IngestSummary, TransformOutcome, TransformReport,
    TransformSummary, UnitReport,
};
pub use table::{ColumnSpec, TableDefinition, TableRef};
