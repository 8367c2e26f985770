//! Table storage capabilities
//!
//! The pipeline touches a database only through two traits:
//! - [`TableStore`]: catalog reads, DDL, row reads/writes, grants
//! - [`BulkCopier`]: one-statement bronze → silver transfer of a [`CopyPlan`]
//!
//! [`postgres`] implements both against live databases. The in-process
//! `memory` backends used by the tests are compiled only for `cfg(test)` or
//! with the `test-support` feature.

use async_trait::async_trait;
use dref_common::identifier::{quote_identifier, quote_literal};
use serde_json::{Map, Value};

use crate::error::{EtlError, EtlResult};
use crate::models::table::{
    ColumnSpec, TableDefinition, TableRef, ID_COLUMN, ORIGINAL_ID_COLUMN, SOURCE_TABLE_COLUMN,
};

#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod postgres;

#[cfg(any(test, feature = "test-support"))]
pub use memory::{MemoryBulkCopier, MemoryStore};
pub use postgres::{CopyStreamCopier, DblinkCopier, PgTableStore};

/// One table row as column → JSON value
pub type Row = Map<String, Value>;

/// Schemas never treated as pipeline data
pub const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast", "public"];

/// Catalog, DDL and row access for one database
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Non-system schemas, sorted by name
    async fn list_schemas(&self) -> EtlResult<Vec<String>>;

    /// Tables of `schema`, sorted by name
    async fn list_tables(&self, schema: &str) -> EtlResult<Vec<String>>;

    /// Columns in ordinal order; empty when the table does not exist
    async fn table_columns(&self, table: &TableRef) -> EtlResult<Vec<ColumnSpec>>;

    async fn row_count(&self, table: &TableRef) -> EtlResult<i64>;

    /// Read one row to prove the table is usable
    ///
    /// Fails with [`crate::EtlError::Inaccessible`].
    async fn probe(&self, table: &TableRef) -> EtlResult<()>;

    async fn table_exists(&self, table: &TableRef) -> EtlResult<bool>;

    /// One page of rows ordered by `order_by`
    async fn fetch_rows(
        &self,
        table: &TableRef,
        order_by: &str,
        limit: i64,
        offset: i64,
    ) -> EtlResult<Vec<Row>>;

    async fn ensure_schema(&self, schema: &str) -> EtlResult<()>;

    /// Drop the table if present and create it from `definition`
    async fn recreate_table(&self, definition: &TableDefinition) -> EtlResult<()>;

    /// Insert one row; absent columns take their defaults
    ///
    /// Values are converted to the column type the way Postgres converts
    /// JSON: strings verbatim, other scalars via their JSON text, JSON
    /// columns receive the value itself, `null` is SQL NULL.
    async fn insert_row(&self, table: &TableRef, row: &Row) -> EtlResult<()>;

    async fn grant_read(&self, table: &TableRef, role: &str) -> EtlResult<()>;

    /// USAGE on the schema plus SELECT on tables created in it later
    async fn grant_schema_read(&self, schema: &str, role: &str) -> EtlResult<()>;

    async fn create_index(&self, table: &TableRef, index: &str, column: &str) -> EtlResult<()>;
}

/// Where a target column's value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// Column of the source table
    Column(String),
    /// Constant text
    Literal(String),
    /// Source lacks the column
    Null,
}

/// One target column and its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedColumn {
    pub target: ColumnSpec,
    pub source: ColumnSource,
}

/// Rows to move from one bronze table into one silver table
#[derive(Debug, Clone, PartialEq)]
pub struct CopyPlan {
    pub source: TableRef,
    pub target: TableRef,
    pub columns: Vec<ProjectedColumn>,
}

impl CopyPlan {
    /// Copy every column unchanged
    pub fn clone_table(source: TableRef, target: TableRef, columns: &[ColumnSpec]) -> Self {
        let columns = columns
            .iter()
            .map(|c| ProjectedColumn {
                target: c.clone(),
                source: ColumnSource::Column(c.name.clone()),
            })
            .collect();
        Self {
            source,
            target,
            columns,
        }
    }

    /// Project a bronze table onto a fusion table's reconciled columns
    ///
    /// `source_table` gets the bronze table name, `original_id` its `id`,
    /// reconciled columns the source lacks become NULL.
    pub fn fusion(
        source: TableRef,
        target: TableRef,
        source_columns: &[ColumnSpec],
        reconciled: &[ColumnSpec],
    ) -> Self {
        let has = |name: &str| source_columns.iter().any(|c| c.name == name);

        let mut columns = vec![
            ProjectedColumn {
                target: ColumnSpec::text(SOURCE_TABLE_COLUMN),
                source: ColumnSource::Literal(source.table.clone()),
            },
            ProjectedColumn {
                target: ColumnSpec::new(ORIGINAL_ID_COLUMN, "INTEGER"),
                source: if has(ID_COLUMN) {
                    ColumnSource::Column(ID_COLUMN.to_string())
                } else {
                    ColumnSource::Null
                },
            },
        ];

        columns.extend(reconciled.iter().map(|spec| ProjectedColumn {
            target: spec.clone(),
            source: if has(&spec.name) {
                ColumnSource::Column(spec.name.clone())
            } else {
                ColumnSource::Null
            },
        }));

        Self {
            source,
            target,
            columns,
        }
    }

    /// Quoted target column list
    pub fn target_column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_identifier(&c.target.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `name type` pairs describing the projected record
    pub fn record_definition(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.target.name), c.target.sql_type))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// SELECT run against the source database, every value cast to its
    /// target type
    pub fn select_sql(&self) -> String {
        let expressions: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let value = match &c.source {
                    ColumnSource::Column(name) => quote_identifier(name),
                    ColumnSource::Literal(text) => quote_literal(text),
                    ColumnSource::Null => "NULL".to_string(),
                };
                format!(
                    "{}::{} AS {}",
                    value,
                    c.target.sql_type,
                    quote_identifier(&c.target.name)
                )
            })
            .collect();

        format!("SELECT {} FROM {}", expressions.join(", "), self.source.qualified())
    }
}

/// One-statement transfer of a [`CopyPlan`]
#[async_trait]
pub trait BulkCopier: Send + Sync {
    /// Returns the number of rows written
    ///
    /// Fails with [`crate::EtlError::BulkCopy`]; the target may then hold a
    /// partial result and must be rebuilt before any retry.
    async fn copy_rows(&self, plan: &CopyPlan) -> EtlResult<u64>;
}

/// Stand-in for a bulk copier whose setup failed
///
/// Every copy fails with the setup error, so the table copier goes straight
/// to its batched fallback and fusion records the source as failed.
#[derive(Debug, Clone)]
pub struct UnavailableCopier {
    method: String,
    reason: String,
}

impl UnavailableCopier {
    pub fn new(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl BulkCopier for UnavailableCopier {
    async fn copy_rows(&self, plan: &CopyPlan) -> EtlResult<u64> {
        Err(EtlError::BulkCopy {
            table: plan.target.to_string(),
            reason: format!("{} unavailable: {}", self.method, self.reason),
        })
    }
}
