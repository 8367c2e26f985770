//! Idempotency ledgers
//!
//! Both ledgers are passed into the services as trait objects; the
//! Postgres implementations keep them in `public.import_tracking` (bronze)
//! and `public.transformation_tracking` (silver). When a ledger table cannot
//! be created, tracking for that run is kept in memory only.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use crate::error::EtlResult;
use crate::models::ledger::{IngestionRecord, TransformationKey, TransformationRecord};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryIngestionLedger, MemoryTransformationLedger};
pub use postgres::{PgIngestionLedger, PgTransformationLedger};

/// Last ingestion attempt per document path
#[async_trait]
pub trait IngestionLedger: Send + Sync {
    async fn lookup(&self, file_path: &str) -> EtlResult<Option<IngestionRecord>>;

    /// Insert or replace the entry for `record.file_path`
    async fn record(&self, record: &IngestionRecord) -> EtlResult<()>;
}

/// Last transformation attempt per (source schema, target, kind)
#[async_trait]
pub trait TransformationLedger: Send + Sync {
    async fn lookup(&self, key: &TransformationKey) -> EtlResult<Option<TransformationRecord>>;

    /// Insert or replace the entry for `record.key`
    async fn record(&self, record: &TransformationRecord) -> EtlResult<()>;
}

/// Postgres ingestion ledger, or an in-memory one when its table is unusable
///
/// `table_ready` is the outcome of creating `import_tracking`.
pub fn ingestion_ledger(
    pool: PgPool,
    table_ready: dref_common::Result<()>,
) -> Arc<dyn IngestionLedger> {
    match table_ready {
        Ok(()) => Arc::new(PgIngestionLedger::new(pool)),
        Err(e) => {
            warn!("⚠ Ingestion ledger table unavailable, tracking in memory only: {}", e);
            Arc::new(MemoryIngestionLedger::new())
        }
    }
}

/// Postgres transformation ledger, or an in-memory one when its table is unusable
///
/// `table_ready` is the outcome of creating `transformation_tracking`.
pub fn transformation_ledger(
    pool: PgPool,
    table_ready: dref_common::Result<()>,
) -> Arc<dyn TransformationLedger> {
    match table_ready {
        Ok(()) => Arc::new(PgTransformationLedger::new(pool)),
        Err(e) => {
            warn!("⚠ Transformation ledger table unavailable, tracking in memory only: {}", e);
            Arc::new(MemoryTransformationLedger::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::models::ledger::{TransformKind, TransformStatus};

    /// Pool pointing at a port nothing listens on
    fn unreachable_pool() -> PgPool {
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://dref@127.0.0.1:1/dref_bronze")
            .unwrap()
    }

    fn missing_table() -> dref_common::Result<()> {
        Err(dref_common::Error::Internal(
            "permission denied for schema public".to_string(),
        ))
    }

    #[tokio::test]
    async fn test_ingestion_ledger_falls_back_to_memory() {
        let ledger = ingestion_ledger(unreachable_pool(), missing_table());

        let record =
            IngestionRecord::success("spells/spells_phb.json", "h", "spells", "spells_phb", 3);
        ledger.record(&record).await.unwrap();
        let entry = ledger.lookup("spells/spells_phb.json").await.unwrap().unwrap();
        assert!(entry.is_current("h"));
    }

    #[tokio::test]
    async fn test_transformation_ledger_falls_back_to_memory() {
        let ledger = transformation_ledger(unreachable_pool(), missing_table());
        let key = TransformationKey::new("spells", "fusion_spells", TransformKind::Fusion);

        ledger
            .record(&TransformationRecord {
                key: key.clone(),
                source_tables: vec!["spells_phb".to_string()],
                target_schema: "spells".to_string(),
                source_hash: Some("h".to_string()),
                row_count: 3,
                status: TransformStatus::Success,
                error_message: None,
                updated_at: None,
            })
            .await
            .unwrap();
        assert!(ledger.lookup(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ready_table_uses_postgres() {
        let ledger = ingestion_ledger(unreachable_pool(), Ok(()));
        assert!(ledger.lookup("spells/spells_phb.json").await.is_err());
    }
}
