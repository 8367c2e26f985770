//! Ledger table definitions
//!
//! `import_tracking` lives in the bronze database, `transformation_tracking`
//! in the silver database. Both are created on startup by
//! [`ensure_ingestion_ledger_table`] / [`ensure_transformation_ledger_table`].

use crate::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use crate::Result;
use sqlx::PgPool;
use tracing::info;

/// Ingestion ledger: one row per document path
pub struct ImportTrackingSchema;

impl TableSchema for ImportTrackingSchema {
    fn table_name() -> &'static str {
        "import_tracking"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "SERIAL").primary_key(),
            ColumnDefinition::new("file_path", "TEXT").not_null().unique(),
            ColumnDefinition::new("file_hash", "TEXT").not_null(),
            ColumnDefinition::new("schema_name", "TEXT").not_null(),
            ColumnDefinition::new("table_name", "TEXT").not_null(),
            ColumnDefinition::new("row_count", "INTEGER").not_null(),
            // success | error
            ColumnDefinition::new("status", "TEXT").not_null(),
            ColumnDefinition::new("error_message", "TEXT"),
            ColumnDefinition::new("created_at", "TIMESTAMP").default("CURRENT_TIMESTAMP"),
            ColumnDefinition::new("updated_at", "TIMESTAMP").default("CURRENT_TIMESTAMP"),
        ]
    }
}

/// Transformation ledger: one row per (source schema, target, kind)
pub struct TransformationTrackingSchema;

impl TableSchema for TransformationTrackingSchema {
    fn table_name() -> &'static str {
        "transformation_tracking"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "SERIAL").primary_key(),
            ColumnDefinition::new("source_schema", "TEXT").not_null(),
            // Comma-delimited list of contributing bronze tables
            ColumnDefinition::new("source_tables", "TEXT").not_null(),
            ColumnDefinition::new("target_schema", "TEXT").not_null(),
            ColumnDefinition::new("target_table", "TEXT").not_null(),
            // fusion | copy
            ColumnDefinition::new("transformation_type", "TEXT").not_null(),
            ColumnDefinition::new("source_hash", "TEXT").not_null(),
            ColumnDefinition::new("row_count", "INTEGER").not_null(),
            // in_progress | success | error
            ColumnDefinition::new("status", "TEXT").not_null(),
            ColumnDefinition::new("error_message", "TEXT"),
            ColumnDefinition::new("created_at", "TIMESTAMP").default("CURRENT_TIMESTAMP"),
            ColumnDefinition::new("updated_at", "TIMESTAMP").default("CURRENT_TIMESTAMP"),
        ]
    }

    fn unique_constraints() -> Vec<Vec<&'static str>> {
        vec![vec!["source_schema", "target_table", "transformation_type"]]
    }
}

/// Create or update `public.import_tracking` in the bronze database
pub async fn ensure_ingestion_ledger_table(pool: &PgPool) -> Result<()> {
    SchemaSync::ensure_table::<ImportTrackingSchema>(pool).await?;
    info!("✓ Ingestion ledger table ready");
    Ok(())
}

/// Create or update `public.transformation_tracking` in the silver database
pub async fn ensure_transformation_ledger_table(pool: &PgPool) -> Result<()> {
    SchemaSync::ensure_table::<TransformationTrackingSchema>(pool).await?;
    info!("✓ Transformation ledger table ready");
    Ok(())
}
