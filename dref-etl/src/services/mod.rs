//! Pipeline services
//!
//! Bronze side: [`document_source`] → [`ingest`].
//! Silver side: [`orchestrator`] drives [`fusion`] and [`copier`], which
//! share [`reconcile`] and the ledger bookkeeping in [`tracking`].
//! [`readiness`] is polled by consumers of the silver layer.

pub mod copier;
pub mod document_source;
pub mod fusion;
pub mod ingest;
pub mod orchestrator;
pub mod readiness;
pub mod reconcile;
pub mod tracking;

pub use copier::TableCopier;
pub use document_source::{DocumentSource, LocalDirectorySource, SourceDocument};
pub use fusion::FusionSynthesizer;
pub use ingest::{IngestOptions, Ingestor};
pub use orchestrator::Orchestrator;
pub use readiness::ReadinessGate;
pub use reconcile::{merge_column_specs, reconcile};

use tracing::warn;

use crate::models::table::TableRef;
use crate::store::TableStore;

/// Grant SELECT to `role` when one is configured; failure is only logged
pub(crate) async fn grant_read_access(store: &dyn TableStore, table: &TableRef, role: Option<&str>) {
    let Some(role) = role else {
        return;
    };
    if let Err(e) = store.grant_read(table, role).await {
        warn!(table = %table, role = %role, "⚠ Could not grant read access: {}", e);
    }
}
