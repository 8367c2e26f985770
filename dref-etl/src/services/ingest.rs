//! Ingestion engine
//!
//! Loads one JSON document into one bronze table. The table shape is
//! inferred from the document itself (schema-on-read): every flattened key
//! seen in any item becomes a TEXT column, and every row also keeps the whole
//! item in `json_data`.
//!
//! Failures degrade instead of aborting: a row that cannot be written
//! structurally is retried JSON-only, and a document whose structured table
//! cannot be created is loaded into a JSON-only table.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dref_common::config::EtlConfig;
use dref_common::fingerprint::document_fingerprint;
use dref_common::identifier::{sanitize, truncate_identifier, MAX_IDENTIFIER_LEN};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::document_source::DocumentSource;
use super::grant_read_access;
use crate::error::EtlResult;
use crate::flatten::{FlatRow, FlattenConfig};
use crate::ledger::IngestionLedger;
use crate::models::ledger::IngestionRecord;
use crate::models::report::{BatchReport, IngestMode, IngestOutcome, IngestSummary};
use crate::models::table::{TableDefinition, TableRef, BRONZE_SYSTEM_COLUMNS, JSON_DATA_COLUMN};
use crate::store::{Row, TableStore};

/// Prefix given to document keys that collide with bronze system columns
const COLLISION_PREFIX: &str = "json_";

/// Ingestion settings
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    /// Stripped from document paths before resolving schema and table
    pub path_prefix: String,
    /// Schema for documents without a parent directory
    pub default_schema: String,
    /// Granted SELECT on every bronze table
    pub read_role: Option<String>,
    pub flatten: FlattenConfig,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            path_prefix: "data/".to_string(),
            default_schema: "main".to_string(),
            read_role: None,
            flatten: FlattenConfig::default(),
        }
    }
}

impl IngestOptions {
    pub fn from_config(config: &EtlConfig) -> Self {
        Self {
            path_prefix: config.pipeline.path_prefix.clone(),
            default_schema: config.pipeline.flat_schema.clone(),
            read_role: config.read_role_name().map(str::to_string),
            flatten: FlattenConfig::default(),
        }
    }
}

/// One item after pass 1
struct PreparedItem {
    raw: Value,
    /// `None` when the item could not be flattened
    flat: Option<FlatRow>,
}

/// Row counters for pass 2
#[derive(Default)]
struct InsertCounts {
    inserted: u64,
    json_only: u64,
    dropped: u64,
}

/// Loads documents into the bronze database
pub struct Ingestor {
    store: Arc<dyn TableStore>,
    ledger: Arc<dyn IngestionLedger>,
    options: IngestOptions,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn TableStore>,
        ledger: Arc<dyn IngestionLedger>,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            ledger,
            options,
        }
    }

    /// Bronze table for a document path
    ///
    /// `data/spells/spells_phb.json` → `spells.spells_phb`;
    /// `tables.json` → `main.tables`.
    pub fn resolve_target(&self, document_path: &str) -> TableRef {
        let normalized = document_path.replace('\\', "/");
        let relative = normalized
            .strip_prefix(self.options.path_prefix.as_str())
            .unwrap_or(&normalized);

        let parts: Vec<&str> = relative.split('/').filter(|p| !p.is_empty()).collect();
        let file_name = parts.last().copied().unwrap_or_default();
        let stem = strip_json_extension(file_name);

        let schema = if parts.len() > 1 {
            bounded_name(parts[parts.len() - 2])
        } else {
            self.options.default_schema.clone()
        };

        TableRef::new(schema, bounded_name(stem))
    }

    /// Ingest one document
    ///
    /// **Algorithm:**
    /// 1. Fingerprint the bytes; skip when the ledger holds `success` with
    ///    the same fingerprint
    /// 2. Resolve schema and table from the path
    /// 3. Parse and normalize into items
    /// 4. Pass 1: flatten every item, union the column names
    /// 5. Create the bronze table (JSON-only when that fails or no columns)
    /// 6. Pass 2: insert rows, degrading to JSON-only per row
    /// 7. Grant read access, record the outcome in the ledger
    pub async fn ingest(&self, document_path: &str, bytes: &[u8]) -> EtlResult<IngestOutcome> {
        let fingerprint = document_fingerprint(bytes);

        if self.already_imported(document_path, &fingerprint).await {
            info!(path = %document_path, "✓ Already imported, skipping");
            return Ok(IngestOutcome::Skipped {
                path: document_path.to_string(),
                fingerprint,
            });
        }

        let target = self.resolve_target(document_path);
        info!(path = %document_path, table = %target, "Importing document");

        match self.load(document_path, bytes, &target).await {
            Ok(summary) => {
                info!(
                    path = %document_path,
                    table = %target,
                    rows = summary.rows_inserted,
                    json_only = summary.json_only_rows,
                    dropped = summary.rows_dropped,
                    "✓ Imported document"
                );
                let record = IngestionRecord::success(
                    document_path,
                    &fingerprint,
                    &target.schema,
                    &target.table,
                    summary.rows_inserted as i64,
                );
                self.write_ledger(&record).await;
                Ok(IngestOutcome::Imported(summary))
            }
            Err(e) => {
                error!(path = %document_path, table = %target, "Import failed: {}", e);
                let record = IngestionRecord::failure(
                    document_path,
                    &fingerprint,
                    &target.schema,
                    &target.table,
                    &e.to_string(),
                );
                self.write_ledger(&record).await;
                Err(e)
            }
        }
    }

    /// Ingest every document of `source`; a failed document never stops the batch
    pub async fn ingest_all(
        &self,
        source: &dyn DocumentSource,
    ) -> EtlResult<BatchReport<IngestOutcome>> {
        let documents = source.documents()?;
        info!(count = documents.len(), "Starting ingestion");

        let mut report = BatchReport::new();
        for document in &documents {
            let result = self.ingest(&document.path, &document.bytes).await;
            report.push(document.path.clone(), result);
        }

        info!(
            documents = report.len(),
            failed = report.failure_count(),
            "Ingestion finished"
        );
        Ok(report)
    }

    async fn already_imported(&self, document_path: &str, fingerprint: &str) -> bool {
        match self.ledger.lookup(document_path).await {
            Ok(Some(record)) => record.is_current(fingerprint),
            Ok(None) => false,
            Err(e) => {
                warn!(path = %document_path, "Ledger lookup failed, importing anyway: {}", e);
                false
            }
        }
    }

    async fn write_ledger(&self, record: &IngestionRecord) {
        if let Err(e) = self.ledger.record(record).await {
            warn!(
                path = %record.file_path,
                status = record.status.as_str(),
                "Could not write ingestion ledger: {}",
                e
            );
        }
    }

    async fn load(
        &self,
        document_path: &str,
        bytes: &[u8],
        target: &TableRef,
    ) -> EtlResult<IngestSummary> {
        let document: Value = serde_json::from_slice(bytes)?;
        let items = normalize_items(document);

        // Pass 1
        let mut prepared = Vec::with_capacity(items.len());
        let mut keys = BTreeSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let flat = match self.options.flatten.try_flatten(&item, "") {
                Ok(flat) => {
                    keys.extend(flat.keys().cloned());
                    Some(flat)
                }
                Err(e) => {
                    warn!(path = %document_path, item = index, "Item kept JSON-only: {}", e);
                    None
                }
            };
            prepared.push(PreparedItem { raw: item, flat });
        }
        debug!(
            path = %document_path,
            items = prepared.len(),
            columns = keys.len(),
            "Analysed document"
        );

        self.store.ensure_schema(&target.schema).await?;

        let column_names = assign_column_names(&keys);
        let mode = self.create_table(target, &column_names).await?;

        // Pass 2
        let mut counts = InsertCounts::default();
        for (index, item) in prepared.iter().enumerate() {
            let structured = match (&mode, &item.flat) {
                (IngestMode::Structured, Some(flat)) => {
                    Some(structured_row(flat, &column_names, &item.raw))
                }
                _ => None,
            };
            self.insert_item(target, index, item, structured, &mut counts)
                .await;
        }

        grant_read_access(self.store.as_ref(), target, self.options.read_role.as_deref()).await;

        Ok(IngestSummary {
            path: document_path.to_string(),
            table: target.clone(),
            mode,
            rows_inserted: counts.inserted,
            json_only_rows: counts.json_only,
            rows_dropped: counts.dropped,
        })
    }

    /// Create the structured table, falling back to JSON-only
    async fn create_table(
        &self,
        target: &TableRef,
        column_names: &HashMap<String, String>,
    ) -> EtlResult<IngestMode> {
        if !column_names.is_empty() {
            let mut columns: Vec<String> = column_names.values().cloned().collect();
            columns.sort();
            let definition = TableDefinition::bronze(target.clone(), &columns);
            match self.store.recreate_table(&definition).await {
                Ok(()) => return Ok(IngestMode::Structured),
                Err(e) => warn!(
                    table = %target,
                    columns = columns.len(),
                    "Structured table failed, falling back to JSON-only: {}",
                    e
                ),
            }
        } else {
            info!(table = %target, "No columns found, creating JSON-only table");
        }

        self.store
            .recreate_table(&TableDefinition::json_only(target.clone()))
            .await?;
        Ok(IngestMode::JsonOnly)
    }

    async fn insert_item(
        &self,
        target: &TableRef,
        index: usize,
        item: &PreparedItem,
        structured: Option<Row>,
        counts: &mut InsertCounts,
    ) {
        if let Some(row) = structured {
            match self.store.insert_row(target, &row).await {
                Ok(()) => {
                    counts.inserted += 1;
                    return;
                }
                Err(e) => warn!(
                    table = %target,
                    item = index,
                    "Row insert failed, retrying JSON-only: {}",
                    e
                ),
            }
        }

        match self.store.insert_row(target, &json_only_row(&item.raw)).await {
            Ok(()) => {
                counts.inserted += 1;
                counts.json_only += 1;
            }
            Err(e) => {
                error!(table = %target, item = index, "JSON-only insert failed, item dropped: {}", e);
                counts.dropped += 1;
            }
        }
    }
}

/// Root array ⇒ its elements; object with exactly one array field ⇒ that
/// array; anything else ⇒ the root alone
pub fn normalize_items(document: Value) -> Vec<Value> {
    match document {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let array_keys: Vec<String> = map
                .iter()
                .filter(|(_, v)| v.is_array())
                .map(|(k, _)| k.clone())
                .collect();
            if let [key] = array_keys.as_slice() {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return items;
                }
            }
            vec![Value::Object(map)]
        }
        other => vec![other],
    }
}

fn bounded_name(text: &str) -> String {
    truncate_identifier(&sanitize(text), MAX_IDENTIFIER_LEN).to_string()
}

fn strip_json_extension(file_name: &str) -> &str {
    match file_name.len().checked_sub(5) {
        Some(cut)
            if file_name.is_char_boundary(cut)
                && file_name[cut..].eq_ignore_ascii_case(".json") =>
        {
            &file_name[..cut]
        }
        _ => file_name,
    }
}

/// Flattened key → column name; keys clashing with system columns (or with
/// an earlier rename) get `json_` prepended until unique
fn assign_column_names(keys: &BTreeSet<String>) -> HashMap<String, String> {
    let mut taken: BTreeSet<String> = BRONZE_SYSTEM_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut names = HashMap::with_capacity(keys.len());

    // Keys that need no rename claim their names first
    for key in keys {
        if !taken.contains(key) {
            taken.insert(key.clone());
            names.insert(key.clone(), key.clone());
        }
    }
    for key in keys {
        if names.contains_key(key) {
            continue;
        }
        let mut candidate = key.clone();
        while taken.contains(&candidate) {
            candidate = truncate_identifier(
                &format!("{}{}", COLLISION_PREFIX, candidate),
                MAX_IDENTIFIER_LEN,
            )
            .to_string();
        }
        taken.insert(candidate.clone());
        names.insert(key.clone(), candidate);
    }

    names
}

/// Scalars as text, null as NULL, plus the whole item in `json_data`
fn structured_row(flat: &FlatRow, column_names: &HashMap<String, String>, raw: &Value) -> Row {
    let mut row = Row::new();
    for (key, value) in flat {
        let Some(column) = column_names.get(key) else {
            continue;
        };
        let text = match value {
            Value::Null => Value::Null,
            Value::String(_) => value.clone(),
            other => Value::String(other.to_string()),
        };
        row.insert(column.clone(), text);
    }
    row.insert(JSON_DATA_COLUMN.to_string(), raw.clone());
    row
}

fn json_only_row(raw: &Value) -> Row {
    let mut row = Row::new();
    row.insert(JSON_DATA_COLUMN.to_string(), raw.clone());
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryIngestionLedger;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn ingestor() -> (Ingestor, Arc<MemoryStore>, Arc<MemoryIngestionLedger>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryIngestionLedger::new());
        let ingestor = Ingestor::new(store.clone(), ledger.clone(), IngestOptions::default());
        (ingestor, store, ledger)
    }

    #[test]
    fn test_resolve_target() {
        let (ingestor, _, _) = ingestor();
        assert_eq!(
            ingestor.resolve_target("data/spells/spells_phb.json"),
            TableRef::new("spells", "spells_phb")
        );
        assert_eq!(
            ingestor.resolve_target("tables.json"),
            TableRef::new("main", "tables")
        );
        assert_eq!(
            ingestor.resolve_target("data/book/Book-LMoP.JSON"),
            TableRef::new("book", "book_lmop")
        );
        assert_eq!(
            ingestor.resolve_target("a/b/3rd party.json"),
            TableRef::new("b", "c_3rd_party")
        );
    }

    #[test]
    fn test_normalize_items() {
        assert_eq!(normalize_items(json!([1, 2])).len(), 2);
        assert_eq!(
            normalize_items(json!({"meta": 1, "spell": [{"a": 1}, {"a": 2}]})).len(),
            2
        );
        let two_arrays = json!({"a": [1], "b": [2]});
        assert_eq!(normalize_items(two_arrays.clone()), vec![two_arrays]);
        assert_eq!(normalize_items(json!("x")), vec![json!("x")]);
    }

    #[test]
    fn test_system_column_collisions_renamed() {
        let keys: BTreeSet<String> = ["id", "json_id", "name", "json_data"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let names = assign_column_names(&keys);
        assert_eq!(names["name"], "name");
        assert_eq!(names["json_id"], "json_id");
        assert_eq!(names["id"], "json_json_id");
        assert_eq!(names["json_data"], "json_json_data");
    }

    #[test]
    fn test_structured_row_writes_text() {
        let flat: FlatRow = [
            ("level".to_string(), json!(3)),
            ("ritual".to_string(), json!(false)),
            ("note".to_string(), Value::Null),
        ]
        .into_iter()
        .collect();
        let names: HashMap<String, String> =
            flat.keys().map(|k| (k.clone(), k.clone())).collect();
        let raw = json!({"level": 3});

        let row = structured_row(&flat, &names, &raw);
        assert_eq!(row["level"], json!("3"));
        assert_eq!(row["ritual"], json!("false"));
        assert_eq!(row["note"], Value::Null);
        assert_eq!(row["json_data"], raw);
    }

    #[tokio::test]
    async fn test_ingest_builds_bronze_table() {
        let (ingestor, store, ledger) = ingestor();
        let doc = json!({"spell": [
            {"name": "Fireball", "level": 3, "id": "fb"},
            {"name": "Shield", "components": {"v": true}}
        ]});

        let outcome = ingestor
            .ingest("data/spells/spells_phb.json", doc.to_string().as_bytes())
            .await
            .unwrap();
        let IngestOutcome::Imported(summary) = outcome else {
            panic!("expected import");
        };
        assert_eq!(summary.mode, IngestMode::Structured);
        assert_eq!(summary.rows_inserted, 2);

        let table = TableRef::new("spells", "spells_phb");
        let definition = store.definition(&table).await.unwrap();
        assert_eq!(
            definition.column_names(),
            vec![
                "id",
                "components_v",
                "json_id",
                "level",
                "name",
                "json_data",
                "created_at",
                "updated_at"
            ]
        );

        let rows = store.rows(&table).await.unwrap();
        assert_eq!(rows[0]["json_id"], json!("fb"));
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[1]["components_v"], json!("true"));
        assert_eq!(rows[1]["level"], Value::Null);

        let entries = ledger.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].row_count, 2);
    }

    #[tokio::test]
    async fn test_read_role_granted() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryIngestionLedger::new());
        let options = IngestOptions {
            read_role: Some("reader".to_string()),
            ..IngestOptions::default()
        };
        let ingestor = Ingestor::new(store.clone(), ledger, options);

        ingestor.ingest("main/t.json", b"[{\"a\": 1}]").await.unwrap();
        assert_eq!(
            store.table_grants().await,
            vec![(TableRef::new("main", "t"), "reader".to_string())]
        );
    }
}
