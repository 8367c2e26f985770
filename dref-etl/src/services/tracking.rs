//! Transformation bookkeeping shared by fusion and copy
//!
//! A [`TransformTracker`] wraps one ledger entry for the duration of one
//! transformation. Ledger failures never fail the transformation: lookups
//! that fail count as "not current", writes that fail are logged.

use dref_common::fingerprint::{tables_fingerprint, TableSnapshot};
use tracing::warn;

use crate::error::EtlResult;
use crate::ledger::TransformationLedger;
use crate::models::ledger::{TransformStatus, TransformationKey, TransformationRecord};
use crate::models::table::TableRef;
use crate::store::TableStore;

/// Fingerprint the given tables of `schema` (row counts + column definitions)
pub async fn fingerprint_tables(
    store: &dyn TableStore,
    schema: &str,
    tables: &[String],
) -> EtlResult<String> {
    let mut snapshots = Vec::with_capacity(tables.len());
    for table in tables {
        let table_ref = TableRef::new(schema, table.as_str());
        let row_count = store.row_count(&table_ref).await?;
        let columns = store
            .table_columns(&table_ref)
            .await?
            .into_iter()
            .map(|c| (c.name, c.sql_type))
            .collect();
        snapshots.push(TableSnapshot {
            table: table.clone(),
            row_count,
            columns,
        });
    }
    Ok(tables_fingerprint(&snapshots))
}

/// One ledger entry followed through `in_progress → success | error`
pub struct TransformTracker<'a> {
    ledger: &'a dyn TransformationLedger,
    key: TransformationKey,
    source_tables: Vec<String>,
    target_schema: String,
    /// No fingerprint: run without bookkeeping
    fingerprint: Option<String>,
}

impl<'a> TransformTracker<'a> {
    pub fn new(
        ledger: &'a dyn TransformationLedger,
        key: TransformationKey,
        source_tables: Vec<String>,
        target_schema: &str,
        fingerprint: Option<String>,
    ) -> Self {
        Self {
            ledger,
            key,
            source_tables,
            target_schema: target_schema.to_string(),
            fingerprint,
        }
    }

    /// Ledger holds `success` with the same fingerprint
    pub async fn is_current(&self) -> bool {
        let Some(fingerprint) = &self.fingerprint else {
            return false;
        };
        match self.ledger.lookup(&self.key).await {
            Ok(Some(record)) => record.is_current(fingerprint),
            Ok(None) => false,
            Err(e) => {
                warn!(key = %self.key, "Ledger lookup failed, treating as not done: {}", e);
                false
            }
        }
    }

    pub async fn mark_in_progress(&self) {
        self.write(TransformStatus::InProgress, 0, None).await;
    }

    pub async fn mark_success(&self, row_count: i64) {
        self.write(TransformStatus::Success, row_count, None).await;
    }

    pub async fn mark_error(&self, message: &str) {
        self.write(TransformStatus::Error, 0, Some(message.to_string())).await;
    }

    async fn write(&self, status: TransformStatus, row_count: i64, error_message: Option<String>) {
        if self.fingerprint.is_none() {
            return;
        }
        let record = TransformationRecord {
            key: self.key.clone(),
            source_tables: self.source_tables.clone(),
            target_schema: self.target_schema.clone(),
            source_hash: self.fingerprint.clone(),
            row_count,
            status,
            error_message,
            updated_at: None,
        };
        if let Err(e) = self.ledger.record(&record).await {
            warn!(
                key = %self.key,
                status = status.as_str(),
                "Could not write transformation ledger: {}",
                e
            );
        }
    }
}
