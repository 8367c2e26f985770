//! Shared fixtures for dref-etl integration tests
//!
//! Everything runs against the in-memory store, bulk copier and ledgers.

#![allow(dead_code)]

use std::sync::Arc;

use dref_common::config::PipelineConfig;
use dref_etl::ledger::MemoryTransformationLedger;
use dref_etl::models::table::{TableDefinition, TableRef};
use dref_etl::services::{FusionSynthesizer, Orchestrator, TableCopier};
use dref_etl::store::{BulkCopier, MemoryBulkCopier, MemoryStore, Row, TableStore};
use serde_json::Value;

/// Bronze and silver stores wired to one bulk copier and one ledger
pub struct Pipeline {
    pub bronze: Arc<MemoryStore>,
    pub silver: Arc<MemoryStore>,
    pub copier: Arc<MemoryBulkCopier>,
    pub ledger: Arc<MemoryTransformationLedger>,
}

impl Pipeline {
    pub fn new() -> Self {
        let bronze = Arc::new(MemoryStore::new());
        let silver = Arc::new(MemoryStore::new());
        let copier = Arc::new(MemoryBulkCopier::new(bronze.clone(), silver.clone()));
        Self {
            bronze,
            silver,
            copier,
            ledger: Arc::new(MemoryTransformationLedger::new()),
        }
    }

    pub fn fusion(&self) -> FusionSynthesizer {
        FusionSynthesizer::new(
            self.bronze.clone(),
            self.silver.clone(),
            self.copier.clone(),
            self.ledger.clone(),
            Some("reader".to_string()),
        )
    }

    pub fn table_copier(&self, batch_size: i64) -> TableCopier {
        self.table_copier_using(self.copier.clone(), batch_size)
    }

    /// Table copier over a different bulk copier
    pub fn table_copier_using(&self, bulk: Arc<dyn BulkCopier>, batch_size: i64) -> TableCopier {
        TableCopier::new(
            self.bronze.clone(),
            self.silver.clone(),
            bulk,
            self.ledger.clone(),
            Some("reader".to_string()),
            batch_size,
        )
    }

    pub fn orchestrator(&self, pipeline: PipelineConfig) -> Orchestrator {
        self.orchestrator_using(self.copier.clone(), pipeline)
    }

    /// Orchestrator over a different bulk copier
    pub fn orchestrator_using(
        &self,
        bulk: Arc<dyn BulkCopier>,
        pipeline: PipelineConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            self.bronze.clone(),
            self.silver.clone(),
            bulk,
            self.ledger.clone(),
            pipeline,
            Some("reader".to_string()),
        )
    }
}

/// JSON object → row
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row fixture must be an object, got {}", other),
    }
}

/// Create a bronze-shaped table with TEXT `columns` and the given rows
pub async fn seed_bronze(
    store: &MemoryStore,
    schema: &str,
    table: &str,
    columns: &[&str],
    rows: Vec<Value>,
) -> TableRef {
    let table = TableRef::new(schema, table);
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    store
        .seed_table(
            TableDefinition::bronze(table.clone(), &columns),
            rows.into_iter().map(row).collect(),
        )
        .await
        .expect("seed bronze table");
    table
}

/// Append one row to an existing table
pub async fn append(store: &MemoryStore, table: &TableRef, value: Value) {
    store
        .insert_row(table, &row(value))
        .await
        .expect("append row");
}

/// Values of `column` over all rows of `table`
pub async fn column_values(store: &MemoryStore, table: &TableRef, column: &str) -> Vec<Value> {
    store
        .rows(table)
        .await
        .expect("table exists")
        .iter()
        .map(|r| r.get(column).cloned().unwrap_or(Value::Null))
        .collect()
}
