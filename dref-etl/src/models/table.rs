//! Table shapes
//!
//! Every table the pipeline creates is described by a [`TableDefinition`]
//! first. DDL is only rendered from a definition that passed
//! [`TableDefinition::validate`], so identifiers and type names taken from
//! documents or the catalog never reach SQL unchecked.

use crate::error::{EtlError, EtlResult};
use dref_common::identifier::{is_valid_identifier, quote_identifier};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Primary key column of bronze and fusion tables
pub const ID_COLUMN: &str = "id";
/// Lossless copy of the source item in bronze tables
pub const JSON_DATA_COLUMN: &str = "json_data";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";
/// Provenance columns of fusion tables
pub const SOURCE_TABLE_COLUMN: &str = "source_table";
pub const ORIGINAL_ID_COLUMN: &str = "original_id";

/// Columns every bronze table carries regardless of its documents
pub const BRONZE_SYSTEM_COLUMNS: &[&str] =
    &[ID_COLUMN, JSON_DATA_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];

/// Schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// `"schema"."table"` for SQL
    pub fn qualified(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.table)
        )
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Column name and SQL type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, "TEXT")
    }
}

/// Declarative table shape
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub table: TableRef,
    /// Auto-incrementing `id SERIAL PRIMARY KEY`
    pub serial_id: bool,
    /// Columns after the key, in creation order
    pub columns: Vec<ColumnSpec>,
    /// Trailing `created_at`/`updated_at` with `CURRENT_TIMESTAMP` defaults
    pub timestamps: bool,
}

impl TableDefinition {
    /// Bronze table: `id`, one TEXT column per key, `json_data`, timestamps
    pub fn bronze(table: TableRef, data_columns: &[String]) -> Self {
        let mut columns: Vec<ColumnSpec> = data_columns.iter().map(ColumnSpec::text).collect();
        columns.push(ColumnSpec::new(JSON_DATA_COLUMN, "JSONB"));
        Self {
            table,
            serial_id: true,
            columns,
            timestamps: true,
        }
    }

    /// Bronze table holding only the raw items
    pub fn json_only(table: TableRef) -> Self {
        Self::bronze(table, &[])
    }

    /// Fusion table: `id`, `source_table`, `original_id`, reconciled columns
    pub fn fusion(table: TableRef, reconciled: &[ColumnSpec]) -> Self {
        let mut columns = vec![
            ColumnSpec::text(SOURCE_TABLE_COLUMN),
            ColumnSpec::new(ORIGINAL_ID_COLUMN, "INTEGER"),
        ];
        columns.extend(reconciled.iter().cloned());
        Self {
            table,
            serial_id: true,
            columns,
            timestamps: false,
        }
    }

    /// Column-for-column clone of a source table
    pub fn clone_of(table: TableRef, source_columns: &[ColumnSpec]) -> Self {
        Self {
            table,
            serial_id: false,
            columns: source_columns.to_vec(),
            timestamps: false,
        }
    }

    /// All column names in creation order
    pub fn column_names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.columns.len() + 3);
        if self.serial_id {
            names.push(ID_COLUMN);
        }
        names.extend(self.columns.iter().map(|c| c.name.as_str()));
        if self.timestamps {
            names.push(CREATED_AT_COLUMN);
            names.push(UPDATED_AT_COLUMN);
        }
        names
    }

    /// Check identifiers, type names and column uniqueness
    pub fn validate(&self) -> EtlResult<()> {
        for part in [&self.table.schema, &self.table.table] {
            if !is_valid_identifier(part) {
                return Err(EtlError::InvalidTable(format!(
                    "{}: {:?} is not a valid identifier",
                    self.table, part
                )));
            }
        }

        let names = self.column_names();
        if names.is_empty() {
            return Err(EtlError::InvalidTable(format!("{}: no columns", self.table)));
        }

        let mut seen = HashSet::new();
        for name in &names {
            if !is_valid_identifier(name) {
                return Err(EtlError::InvalidTable(format!(
                    "{}: column {:?} is not a valid identifier",
                    self.table, name
                )));
            }
            if !seen.insert(*name) {
                return Err(EtlError::InvalidTable(format!(
                    "{}: duplicate column {:?}",
                    self.table, name
                )));
            }
        }

        for column in &self.columns {
            if !is_safe_type_name(&column.sql_type) {
                return Err(EtlError::InvalidTable(format!(
                    "{}: column {:?} has unusable type {:?}",
                    self.table, column.name, column.sql_type
                )));
            }
        }

        Ok(())
    }

    /// CREATE TABLE statement; fails when the definition is invalid
    pub fn create_table_sql(&self) -> EtlResult<String> {
        self.validate()?;

        let mut clauses = Vec::with_capacity(self.columns.len() + 3);
        if self.serial_id {
            clauses.push(format!("{} SERIAL PRIMARY KEY", quote_identifier(ID_COLUMN)));
        }
        for column in &self.columns {
            clauses.push(format!("{} {}", quote_identifier(&column.name), column.sql_type));
        }
        if self.timestamps {
            for name in [CREATED_AT_COLUMN, UPDATED_AT_COLUMN] {
                clauses.push(format!(
                    "{} TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
                    quote_identifier(name)
                ));
            }
        }

        Ok(format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.table.qualified(),
            clauses.join(",\n    ")
        ))
    }
}

/// Type names as produced by `format_type`: letters, digits, spaces,
/// precision parentheses and array brackets
fn is_safe_type_name(sql_type: &str) -> bool {
    !sql_type.trim().is_empty()
        && sql_type.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ',' | '[' | ']')
        })
}
