//! Unit outcomes and batch reports

use crate::error::EtlError;
use crate::models::ledger::TransformKind;
use crate::models::table::TableRef;
use serde::Serialize;

/// How a bronze table was built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// One TEXT column per flattened key plus `json_data`
    Structured,
    /// Only `json_data`; no keys were found or the structured table failed
    JsonOnly,
}

/// Counters for one imported document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub path: String,
    pub table: TableRef,
    pub mode: IngestMode,
    /// Rows written, structured and JSON-only together
    pub rows_inserted: u64,
    /// Rows written JSON-only (all of them in [`IngestMode::JsonOnly`])
    pub json_only_rows: u64,
    /// Items that could not be written at all
    pub rows_dropped: u64,
}

/// Result of ingesting one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IngestOutcome {
    /// Identical bytes already imported successfully
    Skipped { path: String, fingerprint: String },
    Imported(IngestSummary),
}

/// Counters for one completed fusion or copy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformSummary {
    pub target: TableRef,
    pub kind: TransformKind,
    pub row_count: i64,
    /// Bronze tables that contributed
    pub sources: Vec<String>,
    /// Bronze tables whose bulk copy failed (fusion only)
    pub failed_sources: Vec<String>,
    /// Copy had to fall back to the chunked row-by-row path
    pub used_fallback: bool,
    /// Rows skipped by the chunked fallback
    pub rows_failed: u64,
}

/// Result of one fusion or copy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TransformOutcome {
    /// Ledger says the target matches the current sources
    Skipped { target: TableRef },
    /// No accessible source tables
    NothingToDo { target: TableRef },
    Completed(TransformSummary),
}

/// One unit of a batch and its result
#[derive(Debug)]
pub struct UnitReport<T> {
    pub unit: String,
    pub result: Result<T, EtlError>,
}

/// Per-unit results of a batch; a failed unit never aborts the batch
#[derive(Debug)]
pub struct BatchReport<T> {
    pub units: Vec<UnitReport<T>>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self { units: Vec::new() }
    }
}

impl<T> BatchReport<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: impl Into<String>, result: Result<T, EtlError>) {
        self.units.push(UnitReport {
            unit: unit.into(),
            result,
        });
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &T)> {
        self.units
            .iter()
            .filter_map(|u| u.result.as_ref().ok().map(|v| (u.unit.as_str(), v)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &EtlError)> {
        self.units
            .iter()
            .filter_map(|u| u.result.as_ref().err().map(|e| (u.unit.as_str(), e)))
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    /// Result recorded for `unit`, if any
    pub fn get(&self, unit: &str) -> Option<&Result<T, EtlError>> {
        self.units.iter().find(|u| u.unit == unit).map(|u| &u.result)
    }
}

/// Report of one orchestrator run
pub type TransformReport = BatchReport<TransformOutcome>;
