//! Content fingerprints
//!
//! SHA-256 digests that decide whether a document or a set of bronze tables
//! changed since the last successful run. Both ledgers store these as
//! lower-case hex strings.

use sha2::{Digest, Sha256};

/// Fingerprint of a raw document
pub fn document_fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// The parts of a table that make up its fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    pub table: String,
    pub row_count: i64,
    /// (column name, SQL type) in ordinal order
    pub columns: Vec<(String, String)>,
}

impl TableSnapshot {
    fn canonical(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|(name, sql_type)| format!("{} {}", name, sql_type))
            .collect();
        format!("{}:{}:[{}]", self.table, self.row_count, columns.join(","))
    }
}

/// Fingerprint over a set of tables (row counts + column definitions)
///
/// The per-table descriptions are sorted before hashing, so the result does
/// not depend on the order tables were listed in.
pub fn tables_fingerprint(snapshots: &[TableSnapshot]) -> String {
    let mut parts: Vec<String> = snapshots.iter().map(TableSnapshot::canonical).collect();
    parts.sort();
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    format!("{:x}", hasher.finalize())
}
