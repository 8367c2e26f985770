//! In-process storage backends
//!
//! [`MemoryStore`] mimics the parts of Postgres the pipeline relies on:
//! serial ids, `CURRENT_TIMESTAMP` defaults, text/integer/JSON value
//! conversion and the type names `format_type` reports. Failures can be
//! injected per table or per row to exercise the fallback paths.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{BulkCopier, ColumnSource, CopyPlan, Row, TableStore, SYSTEM_SCHEMAS};
use crate::error::{EtlError, EtlResult};
use crate::models::table::{
    ColumnSpec, TableDefinition, TableRef, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN,
};

type InsertPredicate = Box<dyn Fn(&TableRef, &Row) -> bool + Send + Sync>;
type CreatePredicate = Box<dyn Fn(&TableDefinition) -> bool + Send + Sync>;

struct MemoryTable {
    definition: TableDefinition,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemoryTable {
    /// Columns as `format_type` would report them
    fn columns(&self) -> Vec<ColumnSpec> {
        let mut columns = Vec::new();
        if self.definition.serial_id {
            columns.push(ColumnSpec::new(ID_COLUMN, "integer"));
        }
        columns.extend(
            self.definition
                .columns
                .iter()
                .map(|c| ColumnSpec::new(c.name.clone(), reported_type(&c.sql_type))),
        );
        if self.definition.timestamps {
            for name in [CREATED_AT_COLUMN, UPDATED_AT_COLUMN] {
                columns.push(ColumnSpec::new(name, "timestamp without time zone"));
            }
        }
        columns
    }
}

fn reported_type(sql_type: &str) -> String {
    let lower = sql_type.trim().to_ascii_lowercase();
    match lower.as_str() {
        "serial" | "int" | "int4" => "integer".to_string(),
        "bigserial" | "int8" => "bigint".to_string(),
        "timestamp" => "timestamp without time zone".to_string(),
        _ => lower,
    }
}

#[derive(Default)]
struct State {
    schemas: BTreeSet<String>,
    tables: BTreeMap<TableRef, MemoryTable>,
    table_grants: Vec<(TableRef, String)>,
    schema_grants: Vec<(String, String)>,
    indexes: Vec<(TableRef, String, String)>,
}

#[derive(Default)]
struct Faults {
    inaccessible: HashSet<TableRef>,
    insert_failures: Vec<InsertPredicate>,
    create_failures: Vec<CreatePredicate>,
    list_schemas_fails: bool,
    index_creation_fails: bool,
}

/// [`TableStore`] holding tables in memory
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    faults: RwLock<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `definition` and fill it with `rows`
    pub async fn seed_table(&self, definition: TableDefinition, rows: Vec<Row>) -> EtlResult<()> {
        let table = definition.table.clone();
        self.ensure_schema(&table.schema).await?;
        self.recreate_table(&definition).await?;
        for row in &rows {
            self.insert_row(&table, row).await?;
        }
        Ok(())
    }

    /// All rows of a table in insertion order
    pub async fn rows(&self, table: &TableRef) -> EtlResult<Vec<Row>> {
        let state = self.state.read().await;
        state
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| missing(table))
    }

    pub async fn has_schema(&self, schema: &str) -> bool {
        self.state.read().await.schemas.contains(schema)
    }

    /// Current table definition, if the table exists
    pub async fn definition(&self, table: &TableRef) -> Option<TableDefinition> {
        let state = self.state.read().await;
        state.tables.get(table).map(|t| t.definition.clone())
    }

    pub async fn table_grants(&self) -> Vec<(TableRef, String)> {
        self.state.read().await.table_grants.clone()
    }

    pub async fn schema_grants(&self) -> Vec<(String, String)> {
        self.state.read().await.schema_grants.clone()
    }

    /// (table, index name, column) triples
    pub async fn indexes(&self) -> Vec<(TableRef, String, String)> {
        self.state.read().await.indexes.clone()
    }

    pub async fn drop_table(&self, table: &TableRef) {
        self.state.write().await.tables.remove(table);
    }

    /// Every read of `table` fails as if permissions were revoked
    pub async fn make_inaccessible(&self, table: TableRef) {
        self.faults.write().await.inaccessible.insert(table);
    }

    /// Inserts matching `predicate` fail
    pub async fn fail_inserts_where<F>(&self, predicate: F)
    where
        F: Fn(&TableRef, &Row) -> bool + Send + Sync + 'static,
    {
        self.faults.write().await.insert_failures.push(Box::new(predicate));
    }

    /// Table creation matching `predicate` fails
    pub async fn fail_creates_where<F>(&self, predicate: F)
    where
        F: Fn(&TableDefinition) -> bool + Send + Sync + 'static,
    {
        self.faults.write().await.create_failures.push(Box::new(predicate));
    }

    pub async fn fail_schema_listing(&self) {
        self.faults.write().await.list_schemas_fails = true;
    }

    pub async fn fail_index_creation(&self) {
        self.faults.write().await.index_creation_fails = true;
    }

    async fn check_accessible(&self, table: &TableRef) -> EtlResult<()> {
        if self.faults.read().await.inaccessible.contains(table) {
            return Err(EtlError::Inaccessible {
                table: table.to_string(),
                reason: "permission denied".to_string(),
            });
        }
        Ok(())
    }
}

fn missing(table: &TableRef) -> EtlError {
    EtlError::Store(format!("relation {} does not exist", table))
}

/// Convert `value` the way Postgres stores JSON input into a column of `sql_type`
fn coerce(value: &Value, sql_type: &str) -> EtlResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let lower = sql_type.to_ascii_lowercase();
    if lower == "json" || lower == "jsonb" {
        return Ok(value.clone());
    }

    if matches!(
        lower.as_str(),
        "integer" | "bigint" | "smallint" | "int" | "int2" | "int4" | "int8" | "serial"
    ) {
        return match value {
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| EtlError::Store(format!("invalid input for type {}: {:?}", sql_type, s))),
            other => Err(EtlError::Store(format!(
                "invalid input for type {}: {}",
                sql_type, other
            ))),
        };
    }

    match value {
        Value::String(_) => Ok(value.clone()),
        other => Ok(Value::String(other.to_string())),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        // NULLs sort last, as in Postgres ascending order
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn current_timestamp() -> Value {
    Value::String(
        chrono::Utc::now()
            .naive_utc()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string(),
    )
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn list_schemas(&self) -> EtlResult<Vec<String>> {
        if self.faults.read().await.list_schemas_fails {
            return Err(EtlError::Store("schema listing failed".to_string()));
        }
        let state = self.state.read().await;
        Ok(state
            .schemas
            .iter()
            .filter(|s| !SYSTEM_SCHEMAS.contains(&s.as_str()))
            .cloned()
            .collect())
    }

    async fn list_tables(&self, schema: &str) -> EtlResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .keys()
            .filter(|t| t.schema == schema)
            .map(|t| t.table.clone())
            .collect())
    }

    async fn table_columns(&self, table: &TableRef) -> EtlResult<Vec<ColumnSpec>> {
        self.check_accessible(table).await?;
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(table)
            .map(MemoryTable::columns)
            .unwrap_or_default())
    }

    async fn row_count(&self, table: &TableRef) -> EtlResult<i64> {
        self.check_accessible(table).await?;
        let state = self.state.read().await;
        let table = state.tables.get(table).ok_or_else(|| missing(table))?;
        Ok(table.rows.len() as i64)
    }

    async fn probe(&self, table: &TableRef) -> EtlResult<()> {
        self.check_accessible(table).await?;
        let state = self.state.read().await;
        if state.tables.contains_key(table) {
            Ok(())
        } else {
            Err(EtlError::Inaccessible {
                table: table.to_string(),
                reason: "relation does not exist".to_string(),
            })
        }
    }

    async fn table_exists(&self, table: &TableRef) -> EtlResult<bool> {
        Ok(self.state.read().await.tables.contains_key(table))
    }

    async fn fetch_rows(
        &self,
        table: &TableRef,
        order_by: &str,
        limit: i64,
        offset: i64,
    ) -> EtlResult<Vec<Row>> {
        self.check_accessible(table).await?;
        let state = self.state.read().await;
        let table = state.tables.get(table).ok_or_else(|| missing(table))?;

        let mut rows = table.rows.clone();
        rows.sort_by(|a, b| compare_values(a.get(order_by), b.get(order_by)));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn ensure_schema(&self, schema: &str) -> EtlResult<()> {
        self.state.write().await.schemas.insert(schema.to_string());
        Ok(())
    }

    async fn recreate_table(&self, definition: &TableDefinition) -> EtlResult<()> {
        definition.validate()?;

        let faults = self.faults.read().await;
        if faults.create_failures.iter().any(|fail| fail(definition)) {
            return Err(EtlError::Store(format!(
                "could not create {}",
                definition.table
            )));
        }
        drop(faults);

        let mut state = self.state.write().await;
        if !state.schemas.contains(&definition.table.schema) {
            return Err(EtlError::Store(format!(
                "schema {} does not exist",
                definition.table.schema
            )));
        }
        state.tables.insert(
            definition.table.clone(),
            MemoryTable {
                definition: definition.clone(),
                rows: Vec::new(),
                next_id: 1,
            },
        );
        Ok(())
    }

    async fn insert_row(&self, table: &TableRef, row: &Row) -> EtlResult<()> {
        let faults = self.faults.read().await;
        if faults.insert_failures.iter().any(|fail| fail(table, row)) {
            return Err(EtlError::Store(format!("row rejected by {}", table)));
        }
        drop(faults);

        let mut state = self.state.write().await;
        let target = state.tables.get_mut(table).ok_or_else(|| missing(table))?;
        let columns = target.columns();

        for key in row.keys() {
            if !columns.iter().any(|c| &c.name == key) {
                return Err(EtlError::Store(format!(
                    "column {} of relation {} does not exist",
                    key, table
                )));
            }
        }

        let mut stored = Row::new();
        for column in &columns {
            let value = match row.get(&column.name) {
                Some(value) => coerce(value, &column.sql_type)?,
                None if column.name == ID_COLUMN && target.definition.serial_id => {
                    Value::from(target.next_id)
                }
                None if target.definition.timestamps
                    && (column.name == CREATED_AT_COLUMN || column.name == UPDATED_AT_COLUMN) =>
                {
                    current_timestamp()
                }
                None => Value::Null,
            };
            stored.insert(column.name.clone(), value);
        }

        if target.definition.serial_id {
            if let Some(id) = stored.get(ID_COLUMN).and_then(Value::as_i64) {
                target.next_id = target.next_id.max(id + 1);
            }
        }
        target.rows.push(stored);
        Ok(())
    }

    async fn grant_read(&self, table: &TableRef, role: &str) -> EtlResult<()> {
        let mut state = self.state.write().await;
        if !state.tables.contains_key(table) {
            return Err(missing(table));
        }
        state.table_grants.push((table.clone(), role.to_string()));
        Ok(())
    }

    async fn grant_schema_read(&self, schema: &str, role: &str) -> EtlResult<()> {
        let mut state = self.state.write().await;
        state.schema_grants.push((schema.to_string(), role.to_string()));
        Ok(())
    }

    async fn create_index(&self, table: &TableRef, index: &str, column: &str) -> EtlResult<()> {
        if self.faults.read().await.index_creation_fails {
            return Err(EtlError::Store(format!("could not create index {}", index)));
        }
        let mut state = self.state.write().await;
        if !state.tables.contains_key(table) {
            return Err(missing(table));
        }
        state
            .indexes
            .push((table.clone(), index.to_string(), column.to_string()));
        Ok(())
    }
}

/// [`BulkCopier`] between two [`MemoryStore`]s
pub struct MemoryBulkCopier {
    bronze: Arc<MemoryStore>,
    silver: Arc<MemoryStore>,
    failing_sources: RwLock<HashSet<String>>,
}

impl MemoryBulkCopier {
    pub fn new(bronze: Arc<MemoryStore>, silver: Arc<MemoryStore>) -> Self {
        Self {
            bronze,
            silver,
            failing_sources: RwLock::new(HashSet::new()),
        }
    }

    /// Bulk copies out of the bronze table `table` fail
    pub async fn fail_source(&self, table: &str) {
        self.failing_sources.write().await.insert(table.to_string());
    }
}

#[async_trait]
impl BulkCopier for MemoryBulkCopier {
    async fn copy_rows(&self, plan: &CopyPlan) -> EtlResult<u64> {
        let bulk_error = |reason: String| EtlError::BulkCopy {
            table: plan.target.to_string(),
            reason,
        };

        if self.failing_sources.read().await.contains(&plan.source.table) {
            return Err(bulk_error(format!("transfer from {} aborted", plan.source)));
        }

        let source_rows = self
            .bronze
            .rows(&plan.source)
            .await
            .map_err(|e| bulk_error(e.to_string()))?;

        let mut projected = Vec::with_capacity(source_rows.len());
        for source_row in &source_rows {
            let mut row = Row::new();
            for column in &plan.columns {
                let value = match &column.source {
                    ColumnSource::Column(name) => source_row.get(name).cloned().unwrap_or(Value::Null),
                    ColumnSource::Literal(text) => Value::String(text.clone()),
                    ColumnSource::Null => Value::Null,
                };
                let value = coerce(&value, &column.target.sql_type)
                    .map_err(|e| bulk_error(e.to_string()))?;
                row.insert(column.target.name.clone(), value);
            }
            projected.push(row);
        }

        // One statement: nothing is written unless every row converts
        for row in &projected {
            self.silver
                .insert_row(&plan.target, row)
                .await
                .map_err(|e| bulk_error(e.to_string()))?;
        }

        Ok(projected.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_serial_ids_and_defaults() {
        let store = MemoryStore::new();
        let table = TableRef::new("spells", "spells_phb");
        store
            .seed_table(
                TableDefinition::bronze(table.clone(), &["name".to_string()]),
                vec![
                    row(&[("name", json!("Fireball"))]),
                    row(&[("name", json!(7))]),
                ],
            )
            .await
            .unwrap();

        let rows = store.rows(&table).await.unwrap();
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[1]["id"], json!(2));
        assert_eq!(rows[1]["name"], json!("7"));
        assert_eq!(rows[0]["json_data"], Value::Null);
        assert!(rows[0]["created_at"].is_string());
    }

    #[tokio::test]
    async fn test_reported_column_types() {
        let store = MemoryStore::new();
        let table = TableRef::new("spells", "spells_phb");
        store
            .seed_table(TableDefinition::bronze(table.clone(), &["name".to_string()]), vec![])
            .await
            .unwrap();

        let columns = store.table_columns(&table).await.unwrap();
        let types: Vec<&str> = columns.iter().map(|c| c.sql_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "integer",
                "text",
                "jsonb",
                "timestamp without time zone",
                "timestamp without time zone"
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_column_rejected() {
        let store = MemoryStore::new();
        let table = TableRef::new("main", "t");
        store
            .seed_table(TableDefinition::json_only(table.clone()), vec![])
            .await
            .unwrap();

        let result = store.insert_row(&table, &row(&[("nope", json!(1))])).await;
        assert!(matches!(result, Err(EtlError::Store(_))));
    }

    #[tokio::test]
    async fn test_fetch_rows_pages_in_order() {
        let store = MemoryStore::new();
        let table = TableRef::new("main", "t");
        let rows = (1..=5).map(|i| row(&[("id", json!(6 - i))])).collect();
        store
            .seed_table(TableDefinition::json_only(table.clone()), rows)
            .await
            .unwrap();

        let page = store.fetch_rows(&table, "id", 2, 2).await.unwrap();
        let ids: Vec<i64> = page.iter().filter_map(|r| r["id"].as_i64()).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = MemoryStore::new();
        let table = TableRef::new("main", "t");
        store
            .seed_table(TableDefinition::json_only(table.clone()), vec![])
            .await
            .unwrap();

        store.make_inaccessible(table.clone()).await;
        assert!(matches!(
            store.probe(&table).await,
            Err(EtlError::Inaccessible { .. })
        ));

        store
            .fail_inserts_where(|_, row| row.contains_key("json_data"))
            .await;
        assert!(store
            .insert_row(&table, &row(&[("json_data", json!({}))]))
            .await
            .is_err());
    }
}
