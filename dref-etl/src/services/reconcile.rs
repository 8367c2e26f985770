//! Column-type reconciliation
//!
//! Merges the column lists of several bronze tables into one list a fusion
//! table can hold every row of.
//!
//! **Widening rules** for a column seen with two types (case-insensitive):
//! 1. TEXT wins over anything
//! 2. else JSONB wins over anything
//! 3. else two integer types give BIGINT if either is BIGINT, otherwise INTEGER
//! 4. else the first-seen type is kept

use tracing::warn;

use crate::error::EtlResult;
use crate::models::table::{ColumnSpec, TableRef, ID_COLUMN};
use crate::store::TableStore;

const INTEGER_TYPES: &[&str] = &["SMALLINT", "INTEGER", "INT", "INT2", "INT4", "INT8", "BIGINT"];

/// Reconciled columns of `tables` in `schema`, excluding `id`
///
/// Tables are read in name order; a table whose columns cannot be read is
/// logged and contributes nothing.
pub async fn reconcile(
    store: &dyn TableStore,
    schema: &str,
    tables: &[String],
) -> EtlResult<Vec<ColumnSpec>> {
    let mut ordered: Vec<&String> = tables.iter().collect();
    ordered.sort();

    let mut per_table = Vec::with_capacity(ordered.len());
    for table in ordered {
        let table_ref = TableRef::new(schema, table.as_str());
        match store.table_columns(&table_ref).await {
            Ok(columns) => per_table.push(columns),
            Err(e) => warn!(table = %table_ref, "Skipping table in reconciliation: {}", e),
        }
    }

    Ok(merge_column_specs(&per_table))
}

/// Merge column lists; output keeps first-seen order
pub fn merge_column_specs(per_table: &[Vec<ColumnSpec>]) -> Vec<ColumnSpec> {
    let mut merged: Vec<ColumnSpec> = Vec::new();

    for columns in per_table {
        for column in columns {
            if column.name == ID_COLUMN {
                continue;
            }
            match merged.iter_mut().find(|c| c.name == column.name) {
                Some(existing) => {
                    existing.sql_type = widen(&existing.sql_type, &column.sql_type);
                }
                None => merged.push(ColumnSpec::new(
                    column.name.clone(),
                    canonical_type(&column.sql_type),
                )),
            }
        }
    }

    merged
}

/// Upper-case spelling for the types the widening rules name
fn canonical_type(sql_type: &str) -> String {
    let upper = sql_type.trim().to_ascii_uppercase();
    match upper.as_str() {
        "TEXT" | "JSONB" | "BIGINT" | "INTEGER" => upper,
        _ => sql_type.to_string(),
    }
}

fn is_integer_type(upper: &str) -> bool {
    INTEGER_TYPES.contains(&upper)
}

fn widen(existing: &str, incoming: &str) -> String {
    let a = existing.trim().to_ascii_uppercase();
    let b = incoming.trim().to_ascii_uppercase();

    if a == b {
        return canonical_type(existing);
    }
    if a == "TEXT" || b == "TEXT" {
        return "TEXT".to_string();
    }
    if a == "JSONB" || b == "JSONB" {
        return "JSONB".to_string();
    }
    if is_integer_type(&a) && is_integer_type(&b) {
        let is_big = |t: &str| t == "BIGINT" || t == "INT8";
        return if is_big(&a) || is_big(&b) {
            "BIGINT".to_string()
        } else {
            "INTEGER".to_string()
        };
    }
    canonical_type(existing)
}
