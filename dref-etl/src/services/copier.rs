//! Table copier
//!
//! Clones one bronze table into the silver database under the same schema
//! and name. The bulk path moves all rows in one statement; when it fails
//! the target is rebuilt and rows are moved in ordered batches, skipping
//! rows that cannot be written.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::grant_read_access;
use super::tracking::{fingerprint_tables, TransformTracker};
use crate::error::{EtlError, EtlResult};
use crate::ledger::TransformationLedger;
use crate::models::ledger::{TransformKind, TransformationKey};
use crate::models::report::{TransformOutcome, TransformSummary};
use crate::models::table::{TableDefinition, TableRef};
use crate::store::{BulkCopier, CopyPlan, TableStore};

/// Copies individual tables bronze → silver
pub struct TableCopier {
    bronze: Arc<dyn TableStore>,
    silver: Arc<dyn TableStore>,
    copier: Arc<dyn BulkCopier>,
    ledger: Arc<dyn TransformationLedger>,
    read_role: Option<String>,
    batch_size: i64,
}

impl TableCopier {
    pub fn new(
        bronze: Arc<dyn TableStore>,
        silver: Arc<dyn TableStore>,
        copier: Arc<dyn BulkCopier>,
        ledger: Arc<dyn TransformationLedger>,
        read_role: Option<String>,
        batch_size: i64,
    ) -> Self {
        Self {
            bronze,
            silver,
            copier,
            ledger,
            read_role,
            batch_size: batch_size.max(1),
        }
    }

    /// Copy `schema.table`
    ///
    /// **Algorithm:**
    /// 1. Probe the source; inaccessible ⇒ nothing to do
    /// 2. Fingerprint it; skip when the ledger says the target is current
    /// 3. Recreate the target from the source columns
    /// 4. Bulk copy; on failure recreate the target and copy in batches
    /// 5. Grant, count, mark the ledger
    pub async fn copy(&self, schema: &str, table: &str) -> EtlResult<TransformOutcome> {
        let source = TableRef::new(schema, table);

        if let Err(e) = self.bronze.probe(&source).await {
            warn!(table = %source, "⚠ Skipping inaccessible table: {}", e);
            return Ok(TransformOutcome::NothingToDo { target: source });
        }

        let tables = vec![table.to_string()];
        let fingerprint = match fingerprint_tables(self.bronze.as_ref(), schema, &tables).await {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                warn!(table = %source, "⚠ Could not fingerprint table, running untracked: {}", e);
                None
            }
        };

        let tracker = TransformTracker::new(
            self.ledger.as_ref(),
            TransformationKey::new(schema, table, TransformKind::Copy),
            tables,
            schema,
            fingerprint,
        );

        if tracker.is_current().await {
            info!(table = %source, "✓ Copy up to date, skipping");
            return Ok(TransformOutcome::Skipped { target: source });
        }

        tracker.mark_in_progress().await;

        match self.build(&source).await {
            Ok(summary) => {
                tracker.mark_success(summary.row_count).await;
                info!(
                    table = %source,
                    rows = summary.row_count,
                    fallback = summary.used_fallback,
                    rows_failed = summary.rows_failed,
                    "✓ Table copied"
                );
                Ok(TransformOutcome::Completed(summary))
            }
            Err(e) => {
                error!(table = %source, "Copy failed: {}", e);
                tracker.mark_error(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn build(&self, source: &TableRef) -> EtlResult<TransformSummary> {
        let columns = self.bronze.table_columns(source).await?;
        let Some(order_by) = columns.first().map(|c| c.name.clone()) else {
            return Err(EtlError::NoColumns(source.to_string()));
        };

        // Same schema and name on the silver side
        let target = source.clone();
        let definition = TableDefinition::clone_of(target.clone(), &columns);

        self.silver.ensure_schema(&target.schema).await?;
        self.silver.recreate_table(&definition).await?;

        let plan = CopyPlan::clone_table(source.clone(), target.clone(), &columns);
        let (used_fallback, rows_failed) = match self.copier.copy_rows(&plan).await {
            Ok(_) => (false, 0),
            Err(e) => {
                warn!(table = %source, "⚠ Bulk copy failed, copying in batches: {}", e);
                self.silver.recreate_table(&definition).await?;
                (true, self.copy_in_batches(source, &target, &order_by).await?)
            }
        };

        grant_read_access(self.silver.as_ref(), &target, self.read_role.as_deref()).await;
        let row_count = self.silver.row_count(&target).await?;

        Ok(TransformSummary {
            target,
            kind: TransformKind::Copy,
            row_count,
            sources: vec![source.table.clone()],
            failed_sources: Vec::new(),
            used_fallback,
            rows_failed,
        })
    }

    /// Row-by-row copy in `batch_size` pages; returns the number of rows skipped
    async fn copy_in_batches(
        &self,
        source: &TableRef,
        target: &TableRef,
        order_by: &str,
    ) -> EtlResult<u64> {
        let mut offset = 0i64;
        let mut failed = 0u64;

        loop {
            let rows = self
                .bronze
                .fetch_rows(source, order_by, self.batch_size, offset)
                .await?;
            if rows.is_empty() {
                break;
            }

            for (index, row) in rows.iter().enumerate() {
                if let Err(e) = self.silver.insert_row(target, row).await {
                    warn!(
                        table = %target,
                        row = offset + index as i64,
                        "⚠ Row not copied: {}",
                        e
                    );
                    failed += 1;
                }
            }

            let fetched = rows.len() as i64;
            offset += fetched;
            info!(table = %target, copied = offset, "Batch copied");
            if fetched < self.batch_size {
                break;
            }
        }

        Ok(failed)
    }
}
