//! Readiness gate
//!
//! Consumers of the silver layer wait here until the tables they need exist.

use std::time::Duration;

use dref_common::config::ReadinessConfig;
use dref_common::Error;
use tracing::{info, warn};

use crate::error::EtlResult;
use crate::models::table::TableRef;
use crate::store::TableStore;

/// Polls a store for required tables
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    required: Vec<TableRef>,
    max_attempts: u32,
    interval: Duration,
    allow_missing: bool,
}

impl ReadinessGate {
    pub fn new(required: Vec<TableRef>, max_attempts: u32, interval: Duration) -> Self {
        Self {
            required,
            max_attempts: max_attempts.max(1),
            interval,
            allow_missing: false,
        }
    }

    pub fn from_config(config: &ReadinessConfig) -> EtlResult<Self> {
        let required = config
            .required_pairs()?
            .into_iter()
            .map(|(schema, table)| TableRef::new(schema, table))
            .collect();
        Ok(Self::new(required, config.max_attempts, Duration::from_secs(config.interval_secs))
            .allow_missing(config.allow_missing))
    }

    /// Succeed with a warning instead of failing when tables stay missing
    pub fn allow_missing(mut self, allow: bool) -> Self {
        self.allow_missing = allow;
        self
    }

    /// Required tables not present right now, as `schema.table`
    pub async fn missing(&self, store: &dyn TableStore) -> Vec<String> {
        let mut missing = Vec::new();
        for table in &self.required {
            match store.table_exists(table).await {
                Ok(true) => {}
                Ok(false) => missing.push(table.to_string()),
                Err(e) => {
                    warn!(table = %table, "Existence check failed: {}", e);
                    missing.push(table.to_string());
                }
            }
        }
        missing
    }

    /// Poll until every required table exists or attempts run out
    pub async fn wait(&self, store: &dyn TableStore) -> EtlResult<()> {
        let mut missing = Vec::new();

        for attempt in 1..=self.max_attempts {
            missing = self.missing(store).await;
            if missing.is_empty() {
                info!(tables = self.required.len(), "✓ All required tables present");
                return Ok(());
            }

            info!(
                attempt,
                max_attempts = self.max_attempts,
                missing = ?missing,
                "Waiting for required tables"
            );
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        if self.allow_missing {
            warn!(missing = ?missing, "⚠ Required tables missing, continuing anyway");
            return Ok(());
        }
        Err(Error::NotReady(missing).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use crate::models::table::TableDefinition;
    use crate::store::MemoryStore;

    fn gate() -> ReadinessGate {
        ReadinessGate::new(
            vec![
                TableRef::new("spells", "fusion_spells"),
                TableRef::new("main", "tables"),
            ],
            3,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_missing_schema_and_table_both_reported() {
        let store = MemoryStore::new();
        store.ensure_schema("main").await.unwrap();
        assert_eq!(
            gate().missing(&store).await,
            vec!["spells.fusion_spells".to_string(), "main.tables".to_string()]
        );
    }

    #[tokio::test]
    async fn test_wait_succeeds_when_present() {
        let store = MemoryStore::new();
        for table in [TableRef::new("spells", "fusion_spells"), TableRef::new("main", "tables")] {
            store
                .seed_table(TableDefinition::json_only(table), vec![])
                .await
                .unwrap();
        }
        assert!(gate().wait(&store).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_exhaustion() {
        let store = MemoryStore::new();
        let result = gate().wait(&store).await;
        match result {
            Err(EtlError::Common(Error::NotReady(missing))) => assert_eq!(missing.len(), 2),
            other => panic!("expected NotReady, got {:?}", other),
        }

        assert!(gate().allow_missing(true).wait(&store).await.is_ok());
    }

    #[test]
    fn test_from_config_defaults() {
        let gate = ReadinessGate::from_config(&ReadinessConfig::default()).unwrap();
        assert_eq!(gate.required.len(), 5);
        assert_eq!(gate.required[0], TableRef::new("bestiary", "fusion_monsters"));
        assert_eq!(gate.interval, Duration::from_secs(10));
    }
}
