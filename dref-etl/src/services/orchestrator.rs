//! Bronze → silver orchestration
//!
//! Walks every bronze schema and decides per table whether it is fused or
//! copied:
//! - the flat schema (`main`): every table copied
//! - `<schema>_*`: fused into `fusion_<schema>` (or its configured override)
//! - `fluff_<schema>_*`: fused into `fusion_fluff_<schema>`
//! - anything else: copied
//!
//! Failures are recorded per unit in the [`TransformReport`]; the run
//! always visits every schema.

use std::sync::Arc;

use dref_common::config::PipelineConfig;
use tracing::{error, info, warn};

use super::copier::TableCopier;
use super::fusion::FusionSynthesizer;
use crate::error::EtlResult;
use crate::ledger::TransformationLedger;
use crate::models::report::{TransformOutcome, TransformReport};
use crate::store::{BulkCopier, TableStore};

/// How the tables of one non-flat schema are handled
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    /// Tables named `<schema>_*`
    pub fused: Vec<String>,
    /// Tables named `fluff_<schema>_*`
    pub fluff: Vec<String>,
    /// Everything else, copied one by one
    pub copied: Vec<String>,
}

impl SchemaPlan {
    pub fn partition(schema: &str, tables: &[String]) -> Self {
        let prefix = format!("{}_", schema);
        let fluff_prefix = format!("fluff_{}_", schema);

        let mut plan = Self::default();
        for table in tables {
            if table.starts_with(&prefix) {
                plan.fused.push(table.clone());
            } else if table.starts_with(&fluff_prefix) {
                plan.fluff.push(table.clone());
            } else {
                plan.copied.push(table.clone());
            }
        }
        plan
    }
}

/// Runs one full bronze → silver transformation
pub struct Orchestrator {
    bronze: Arc<dyn TableStore>,
    silver: Arc<dyn TableStore>,
    fusion: FusionSynthesizer,
    copier: TableCopier,
    pipeline: PipelineConfig,
    read_role: Option<String>,
}

impl Orchestrator {
    pub fn new(
        bronze: Arc<dyn TableStore>,
        silver: Arc<dyn TableStore>,
        bulk: Arc<dyn BulkCopier>,
        ledger: Arc<dyn TransformationLedger>,
        pipeline: PipelineConfig,
        read_role: Option<String>,
    ) -> Self {
        let fusion = FusionSynthesizer::new(
            bronze.clone(),
            silver.clone(),
            bulk.clone(),
            ledger.clone(),
            read_role.clone(),
        );
        let copier = TableCopier::new(
            bronze.clone(),
            silver.clone(),
            bulk,
            ledger,
            read_role.clone(),
            pipeline.copy_batch_size,
        );
        Self {
            bronze,
            silver,
            fusion,
            copier,
            pipeline,
            read_role,
        }
    }

    /// Transform every bronze schema
    ///
    /// **Algorithm:**
    /// 1. Discover bronze schemas (configured defaults when none or on failure)
    /// 2. Create each schema in silver with read grants
    /// 3. Copy every table of the flat schema
    /// 4. Fuse and copy the other schemas per [`SchemaPlan`]
    pub async fn run(&self) -> TransformReport {
        let mut report = TransformReport::new();
        let schemas = self.discover_schemas().await;
        info!(schemas = ?schemas, "Starting bronze → silver transformation");

        for schema in &schemas {
            if let Err(e) = self.prepare_silver_schema(schema).await {
                error!(schema = %schema, "Could not prepare silver schema: {}", e);
                report.push(schema.as_str(), Err(e));
                continue;
            }

            if let Err(e) = self.process_schema(schema, &mut report).await {
                error!(schema = %schema, "Schema processing failed: {}", e);
                report.push(schema.as_str(), Err(e));
            }
        }

        info!(
            units = report.len(),
            failed = report.failure_count(),
            "✓ Transformation finished"
        );
        report
    }

    async fn discover_schemas(&self) -> Vec<String> {
        match self.bronze.list_schemas().await {
            Ok(schemas) if !schemas.is_empty() => schemas,
            Ok(_) => {
                warn!("⚠ No bronze schemas found, using configured defaults");
                self.pipeline.default_schemas.clone()
            }
            Err(e) => {
                warn!("⚠ Schema discovery failed, using configured defaults: {}", e);
                self.pipeline.default_schemas.clone()
            }
        }
    }

    async fn prepare_silver_schema(&self, schema: &str) -> EtlResult<()> {
        self.silver.ensure_schema(schema).await?;
        if let Some(role) = &self.read_role {
            self.silver.grant_schema_read(schema, role).await?;
        }
        Ok(())
    }

    async fn process_schema(&self, schema: &str, report: &mut TransformReport) -> EtlResult<()> {
        let tables = self.bronze.list_tables(schema).await?;

        if schema == self.pipeline.flat_schema {
            info!(schema = %schema, tables = tables.len(), "Copying flat schema");
            for table in &tables {
                self.copy_table(schema, table, report).await;
            }
            return Ok(());
        }

        let plan = SchemaPlan::partition(schema, &tables);
        info!(
            schema = %schema,
            fused = plan.fused.len(),
            fluff = plan.fluff.len(),
            copied = plan.copied.len(),
            "Processing schema"
        );

        if !plan.fused.is_empty() {
            let target = self.pipeline.fusion_table_name(schema);
            let result = self
                .fusion
                .fuse(schema, &format!("{}_", schema), &target)
                .await;
            record(report, schema, &target, result);
        }

        if !plan.fluff.is_empty() {
            let target = self.pipeline.fluff_fusion_table_name(schema);
            let result = self
                .fusion
                .fuse(schema, &format!("fluff_{}_", schema), &target)
                .await;
            record(report, schema, &target, result);
        }

        for table in &plan.copied {
            self.copy_table(schema, table, report).await;
        }

        Ok(())
    }

    async fn copy_table(&self, schema: &str, table: &str, report: &mut TransformReport) {
        let result = self.copier.copy(schema, table).await;
        record(report, schema, table, result);
    }
}

fn record(
    report: &mut TransformReport,
    schema: &str,
    target: &str,
    result: EtlResult<TransformOutcome>,
) {
    report.push(format!("{}.{}", schema, target), result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition() {
        let tables: Vec<String> = [
            "spells_phb",
            "fluff_spells_phb",
            "sources",
            "spellsphb",
            "fluff_items_x",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let plan = SchemaPlan::partition("spells", &tables);
        assert_eq!(plan.fused, vec!["spells_phb"]);
        assert_eq!(plan.fluff, vec!["fluff_spells_phb"]);
        assert_eq!(plan.copied, vec!["sources", "spellsphb", "fluff_items_x"]);
    }
}
