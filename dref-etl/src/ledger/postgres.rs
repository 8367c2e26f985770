//! Postgres ledgers
//!
//! Tables are created by `dref_common::db::ensure_ingestion_ledger_table` /
//! `ensure_transformation_ledger_table` before these are used. Writes are
//! `INSERT … ON CONFLICT DO UPDATE` on the ledger's unique key.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{PgPool, Row};

use super::{IngestionLedger, TransformationLedger};
use crate::error::EtlResult;
use crate::models::ledger::{
    IngestionRecord, TransformationKey, TransformationRecord,
};

/// `row_count` is an INTEGER column
fn clamp_count(count: i64) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

/// Ingestion ledger in `public.import_tracking`
#[derive(Clone)]
pub struct PgIngestionLedger {
    pool: PgPool,
}

impl PgIngestionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IngestionLedger for PgIngestionLedger {
    async fn lookup(&self, file_path: &str) -> EtlResult<Option<IngestionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT file_path, file_hash, schema_name, table_name, row_count,
                   status, error_message, updated_at
            FROM public.import_tracking
            WHERE file_path = $1
            "#,
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(IngestionRecord {
            file_path: row.get("file_path"),
            file_hash: row.get("file_hash"),
            schema_name: row.get::<Option<String>, _>("schema_name").unwrap_or_default(),
            table_name: row.get::<Option<String>, _>("table_name").unwrap_or_default(),
            row_count: row.get::<Option<i32>, _>("row_count").unwrap_or(0) as i64,
            status: row.get::<String, _>("status").parse()?,
            error_message: row.get("error_message"),
            updated_at: row.get::<Option<NaiveDateTime>, _>("updated_at"),
        }))
    }

    async fn record(&self, record: &IngestionRecord) -> EtlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO public.import_tracking
                (file_path, file_hash, schema_name, table_name, row_count,
                 status, error_message, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, CURRENT_TIMESTAMP)
            ON CONFLICT (file_path) DO UPDATE SET
                file_hash = EXCLUDED.file_hash,
                schema_name = EXCLUDED.schema_name,
                table_name = EXCLUDED.table_name,
                row_count = EXCLUDED.row_count,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&record.file_path)
        .bind(&record.file_hash)
        .bind(&record.schema_name)
        .bind(&record.table_name)
        .bind(clamp_count(record.row_count))
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Transformation ledger in `public.transformation_tracking`
#[derive(Clone)]
pub struct PgTransformationLedger {
    pool: PgPool,
}

impl PgTransformationLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransformationLedger for PgTransformationLedger {
    async fn lookup(&self, key: &TransformationKey) -> EtlResult<Option<TransformationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT source_tables, target_schema, source_hash, row_count,
                   status, error_message, updated_at
            FROM public.transformation_tracking
            WHERE source_schema = $1 AND target_table = $2 AND transformation_type = $3
            "#,
        )
        .bind(&key.source_schema)
        .bind(&key.target_table)
        .bind(key.kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(TransformationRecord {
            key: key.clone(),
            source_tables: TransformationRecord::split_source_tables(
                &row.get::<String, _>("source_tables"),
            ),
            target_schema: row.get("target_schema"),
            source_hash: row.get("source_hash"),
            row_count: row.get::<Option<i32>, _>("row_count").unwrap_or(0) as i64,
            status: row.get::<String, _>("status").parse()?,
            error_message: row.get("error_message"),
            updated_at: row.get::<Option<NaiveDateTime>, _>("updated_at"),
        }))
    }

    async fn record(&self, record: &TransformationRecord) -> EtlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO public.transformation_tracking
                (source_schema, source_tables, target_schema, target_table,
                 transformation_type, source_hash, row_count, status,
                 error_message, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, CURRENT_TIMESTAMP)
            ON CONFLICT (source_schema, target_table, transformation_type) DO UPDATE SET
                source_tables = EXCLUDED.source_tables,
                target_schema = EXCLUDED.target_schema,
                source_hash = EXCLUDED.source_hash,
                row_count = EXCLUDED.row_count,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&record.key.source_schema)
        .bind(record.source_tables_joined())
        .bind(&record.target_schema)
        .bind(&record.key.target_table)
        .bind(record.key.kind.as_str())
        .bind(&record.source_hash)
        .bind(clamp_count(record.row_count))
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
