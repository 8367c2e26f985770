//! In-memory ledgers

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{IngestionLedger, TransformationLedger};
use crate::error::{EtlError, EtlResult};
use crate::models::ledger::{IngestionRecord, TransformationKey, TransformationRecord};

/// [`IngestionLedger`] keyed by document path
#[derive(Default)]
pub struct MemoryIngestionLedger {
    entries: RwLock<HashMap<String, IngestionRecord>>,
    writes_fail: RwLock<bool>,
}

impl MemoryIngestionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<IngestionRecord> {
        let mut entries: Vec<IngestionRecord> =
            self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        entries
    }

    /// Make every subsequent write fail
    pub async fn fail_writes(&self) {
        *self.writes_fail.write().await = true;
    }
}

#[async_trait]
impl IngestionLedger for MemoryIngestionLedger {
    async fn lookup(&self, file_path: &str) -> EtlResult<Option<IngestionRecord>> {
        Ok(self.entries.read().await.get(file_path).cloned())
    }

    async fn record(&self, record: &IngestionRecord) -> EtlResult<()> {
        if *self.writes_fail.read().await {
            return Err(EtlError::Store("ingestion ledger unavailable".to_string()));
        }
        let mut stored = record.clone();
        stored.updated_at = Some(Utc::now().naive_utc());
        self.entries
            .write()
            .await
            .insert(stored.file_path.clone(), stored);
        Ok(())
    }
}

/// [`TransformationLedger`] keyed by (source schema, target, kind)
#[derive(Default)]
pub struct MemoryTransformationLedger {
    entries: RwLock<HashMap<TransformationKey, TransformationRecord>>,
    /// Every record call in order, for state-machine assertions
    history: RwLock<Vec<TransformationRecord>>,
    writes_fail: RwLock<bool>,
}

impl MemoryTransformationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &TransformationKey) -> Option<TransformationRecord> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn history(&self) -> Vec<TransformationRecord> {
        self.history.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Make every subsequent write fail
    pub async fn fail_writes(&self) {
        *self.writes_fail.write().await = true;
    }
}

#[async_trait]
impl TransformationLedger for MemoryTransformationLedger {
    async fn lookup(&self, key: &TransformationKey) -> EtlResult<Option<TransformationRecord>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn record(&self, record: &TransformationRecord) -> EtlResult<()> {
        if *self.writes_fail.read().await {
            return Err(EtlError::Store("transformation ledger unavailable".to_string()));
        }
        let mut stored = record.clone();
        stored.updated_at = Some(Utc::now().naive_utc());
        self.history.write().await.push(stored.clone());
        self.entries.write().await.insert(stored.key.clone(), stored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ledger::{TransformKind, TransformStatus};

    #[tokio::test]
    async fn test_ingestion_upsert_replaces_entry() {
        let ledger = MemoryIngestionLedger::new();
        ledger
            .record(&IngestionRecord::failure("a.json", "h1", "main", "a", "bad"))
            .await
            .unwrap();
        ledger
            .record(&IngestionRecord::success("a.json", "h2", "main", "a", 4))
            .await
            .unwrap();

        let entries = ledger.entries().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_current("h2"));
        assert!(entries[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn test_transformation_history_tracks_states() {
        let ledger = MemoryTransformationLedger::new();
        let key = TransformationKey::new("spells", "fusion_spells", TransformKind::Fusion);
        let mut record = TransformationRecord {
            key: key.clone(),
            source_tables: vec!["spells_phb".to_string()],
            target_schema: "spells".to_string(),
            source_hash: Some("h".to_string()),
            row_count: 0,
            status: TransformStatus::InProgress,
            error_message: None,
            updated_at: None,
        };
        ledger.record(&record).await.unwrap();
        record.status = TransformStatus::Success;
        record.row_count = 3;
        ledger.record(&record).await.unwrap();

        let states: Vec<TransformStatus> =
            ledger.history().await.iter().map(|r| r.status).collect();
        assert_eq!(states, vec![TransformStatus::InProgress, TransformStatus::Success]);
        assert_eq!(ledger.len().await, 1);
        assert_eq!(ledger.get(&key).await.map(|r| r.row_count), Some(3));
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let ledger = MemoryIngestionLedger::new();
        ledger.fail_writes().await;
        assert!(ledger
            .record(&IngestionRecord::success("a.json", "h", "main", "a", 1))
            .await
            .is_err());
    }
}
