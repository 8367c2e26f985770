//! Fusion synthesizer
//!
//! Unions every bronze table of a schema sharing a name prefix into one
//! silver table. Each fused row records the bronze table it came from
//! (`source_table`) and its bronze `id` (`original_id`).

use std::sync::Arc;

use dref_common::identifier::{truncate_identifier, MAX_IDENTIFIER_LEN};
use tracing::{debug, error, info, warn};

use super::grant_read_access;
use super::reconcile::reconcile;
use super::tracking::{fingerprint_tables, TransformTracker};
use crate::error::{EtlError, EtlResult};
use crate::ledger::TransformationLedger;
use crate::models::ledger::{TransformKind, TransformationKey};
use crate::models::report::{TransformOutcome, TransformSummary};
use crate::models::table::{
    ColumnSpec, TableDefinition, TableRef, ORIGINAL_ID_COLUMN, SOURCE_TABLE_COLUMN,
};
use crate::store::{BulkCopier, CopyPlan, TableStore};

/// Builds fusion tables in the silver database
pub struct FusionSynthesizer {
    bronze: Arc<dyn TableStore>,
    silver: Arc<dyn TableStore>,
    copier: Arc<dyn BulkCopier>,
    ledger: Arc<dyn TransformationLedger>,
    read_role: Option<String>,
}

impl FusionSynthesizer {
    pub fn new(
        bronze: Arc<dyn TableStore>,
        silver: Arc<dyn TableStore>,
        copier: Arc<dyn BulkCopier>,
        ledger: Arc<dyn TransformationLedger>,
        read_role: Option<String>,
    ) -> Self {
        Self {
            bronze,
            silver,
            copier,
            ledger,
            read_role,
        }
    }

    /// Fuse the tables of `schema` named `table_prefix*` into `target_table`
    ///
    /// **Algorithm:**
    /// 1. Collect accessible bronze tables with the prefix
    /// 2. Fingerprint them; skip when the ledger says the target is current
    /// 3. Mark the ledger entry `in_progress`
    /// 4. Reconcile column types, recreate the target
    /// 5. Bulk-copy each source; a failed source is recorded, not fatal
    /// 6. Grant, index, count, mark `success` (or `error` on failure)
    pub async fn fuse(
        &self,
        schema: &str,
        table_prefix: &str,
        target_table: &str,
    ) -> EtlResult<TransformOutcome> {
        let target = TableRef::new(schema, target_table);

        let sources = self.accessible_sources(schema, table_prefix).await?;
        if sources.is_empty() {
            warn!(target = %target, prefix = %table_prefix, "⚠ No accessible tables to fuse");
            return Ok(TransformOutcome::NothingToDo { target });
        }

        let fingerprint = match fingerprint_tables(self.bronze.as_ref(), schema, &sources).await {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                warn!(target = %target, "⚠ Could not fingerprint sources, running untracked: {}", e);
                None
            }
        };

        let tracker = TransformTracker::new(
            self.ledger.as_ref(),
            TransformationKey::new(schema, target_table, TransformKind::Fusion),
            sources.clone(),
            schema,
            fingerprint,
        );

        if tracker.is_current().await {
            info!(target = %target, "✓ Fusion up to date, skipping");
            return Ok(TransformOutcome::Skipped { target });
        }

        tracker.mark_in_progress().await;
        info!(target = %target, sources = ?sources, "Fusing tables");

        match self.build(&target, &sources).await {
            Ok(summary) => {
                tracker.mark_success(summary.row_count).await;
                info!(
                    target = %target,
                    rows = summary.row_count,
                    failed_sources = summary.failed_sources.len(),
                    "✓ Fusion table created"
                );
                Ok(TransformOutcome::Completed(summary))
            }
            Err(e) => {
                error!(target = %target, "Fusion failed: {}", e);
                tracker.mark_error(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn accessible_sources(&self, schema: &str, table_prefix: &str) -> EtlResult<Vec<String>> {
        let mut accessible = Vec::new();
        for table in self.bronze.list_tables(schema).await? {
            if !table.starts_with(table_prefix) {
                continue;
            }
            let table_ref = TableRef::new(schema, table.as_str());
            match self.bronze.probe(&table_ref).await {
                Ok(()) => accessible.push(table),
                Err(e) => warn!(table = %table_ref, "⚠ Skipping inaccessible table: {}", e),
            }
        }
        accessible.sort();
        Ok(accessible)
    }

    async fn build(&self, target: &TableRef, sources: &[String]) -> EtlResult<TransformSummary> {
        let reconciled = without_provenance(
            reconcile(self.bronze.as_ref(), &target.schema, sources).await?,
            target,
        );
        if reconciled.is_empty() {
            return Err(EtlError::NoColumns(target.to_string()));
        }

        self.silver.ensure_schema(&target.schema).await?;
        self.silver
            .recreate_table(&TableDefinition::fusion(target.clone(), &reconciled))
            .await?;

        let mut fused = Vec::new();
        let mut failed = Vec::new();
        for table in sources {
            let source = TableRef::new(target.schema.as_str(), table.as_str());
            match self.copy_source(&source, target, &reconciled).await {
                Ok(rows) => {
                    debug!(source = %source, target = %target, rows, "Copied source rows");
                    fused.push(table.clone());
                }
                Err(e) => {
                    warn!(source = %source, target = %target, "⚠ Source not fused: {}", e);
                    failed.push(table.clone());
                }
            }
        }

        grant_read_access(self.silver.as_ref(), target, self.read_role.as_deref()).await;

        let index = index_name(&target.table);
        if let Err(e) = self
            .silver
            .create_index(target, &index, SOURCE_TABLE_COLUMN)
            .await
        {
            warn!(target = %target, index = %index, "⚠ Could not create index: {}", e);
        }

        let row_count = self.silver.row_count(target).await?;

        Ok(TransformSummary {
            target: target.clone(),
            kind: TransformKind::Fusion,
            row_count,
            sources: fused,
            failed_sources: failed,
            used_fallback: false,
            rows_failed: 0,
        })
    }

    async fn copy_source(
        &self,
        source: &TableRef,
        target: &TableRef,
        reconciled: &[ColumnSpec],
    ) -> EtlResult<u64> {
        let source_columns = self.bronze.table_columns(source).await?;
        let plan = CopyPlan::fusion(source.clone(), target.clone(), &source_columns, reconciled);
        self.copier.copy_rows(&plan).await
    }
}

/// Bronze columns named like the provenance columns cannot be carried over
fn without_provenance(specs: Vec<ColumnSpec>, target: &TableRef) -> Vec<ColumnSpec> {
    specs
        .into_iter()
        .filter(|spec| {
            let reserved = spec.name == SOURCE_TABLE_COLUMN || spec.name == ORIGINAL_ID_COLUMN;
            if reserved {
                warn!(
                    target = %target,
                    column = %spec.name,
                    "⚠ Dropping column shadowed by provenance"
                );
            }
            !reserved
        })
        .collect()
}

/// `idx_<target>_source_table`, cut to the identifier limit
pub fn index_name(target_table: &str) -> String {
    let name = format!("idx_{}_{}", target_table, SOURCE_TABLE_COLUMN);
    truncate_identifier(&name, MAX_IDENTIFIER_LEN).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name() {
        assert_eq!(index_name("fusion_spells"), "idx_fusion_spells_source_table");
        let long = "f".repeat(80);
        assert_eq!(index_name(&long).len(), MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn test_provenance_columns_dropped() {
        let specs = vec![
            ColumnSpec::text("name"),
            ColumnSpec::text("source_table"),
            ColumnSpec::new("original_id", "INTEGER"),
        ];
        let kept = without_provenance(specs, &TableRef::new("spells", "fusion_spells"));
        assert_eq!(kept, vec![ColumnSpec::text("name")]);
    }
}
