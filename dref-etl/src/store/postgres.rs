//! Postgres storage backends
//!
//! [`PgTableStore`] reads the catalog through `pg_attribute` /
//! `information_schema` and moves rows as JSON (`to_jsonb` out,
//! `jsonb_populate_record` in), so one code path serves every column type.
//!
//! Two [`BulkCopier`]s move whole tables bronze → silver:
//! - [`DblinkCopier`]: `INSERT … SELECT * FROM dblink(…)` inside silver
//! - [`CopyStreamCopier`]: `COPY … TO STDOUT` on bronze streamed into
//!   `COPY … FROM STDIN` on silver

use async_trait::async_trait;
use dref_common::identifier::quote_identifier;
use futures::StreamExt;
use serde_json::Value;
use sqlx::postgres::PgPoolCopyExt;
use sqlx::{PgPool, Row as _};
use tracing::{debug, info};

use super::{BulkCopier, CopyPlan, Row, TableStore, SYSTEM_SCHEMAS};
use crate::error::{EtlError, EtlResult};
use crate::models::table::{ColumnSpec, TableDefinition, TableRef};

/// [`TableStore`] over a connection pool
#[derive(Clone)]
pub struct PgTableStore {
    pool: PgPool,
}

impl PgTableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn list_schemas(&self) -> EtlResult<Vec<String>> {
        let excluded: Vec<String> = SYSTEM_SCHEMAS.iter().map(|s| s.to_string()).collect();
        let schemas: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT schema_name::TEXT
            FROM information_schema.schemata
            WHERE schema_name::TEXT <> ALL($1)
              AND schema_name NOT LIKE 'pg_temp_%'
              AND schema_name NOT LIKE 'pg_toast_temp_%'
            ORDER BY schema_name
            "#,
        )
        .bind(&excluded)
        .fetch_all(&self.pool)
        .await?;

        Ok(schemas)
    }

    async fn list_tables(&self, schema: &str) -> EtlResult<Vec<String>> {
        let tables: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT table_name::TEXT
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;

        Ok(tables)
    }

    async fn table_columns(&self, table: &TableRef) -> EtlResult<Vec<ColumnSpec>> {
        let rows = sqlx::query(
            r#"
            SELECT a.attname::TEXT AS name,
                   format_type(a.atttypid, a.atttypmod) AS sql_type
            FROM pg_attribute a
            JOIN pg_class c ON a.attrelid = c.oid
            JOIN pg_namespace n ON c.relnamespace = n.oid
            WHERE n.nspname = $1
              AND c.relname = $2
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
        )
        .bind(&table.schema)
        .bind(&table.table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                ColumnSpec::new(
                    row.get::<String, _>("name"),
                    row.get::<String, _>("sql_type"),
                )
            })
            .collect())
    }

    async fn row_count(&self, table: &TableRef) -> EtlResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.qualified());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn probe(&self, table: &TableRef) -> EtlResult<()> {
        let sql = format!("SELECT 1 FROM {} LIMIT 1", table.qualified());
        sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EtlError::Inaccessible {
                table: table.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> EtlResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
            "#,
        )
        .bind(&table.schema)
        .bind(&table.table)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn fetch_rows(
        &self,
        table: &TableRef,
        order_by: &str,
        limit: i64,
        offset: i64,
    ) -> EtlResult<Vec<Row>> {
        let sql = format!(
            "SELECT to_jsonb(t) AS row FROM (SELECT * FROM {} ORDER BY {} LIMIT $1 OFFSET $2) t",
            table.qualified(),
            quote_identifier(order_by)
        );
        let values: Vec<Value> = sqlx::query_scalar(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        values
            .into_iter()
            .map(|value| match value {
                Value::Object(map) => Ok(map),
                other => Err(EtlError::Store(format!(
                    "Expected a row object from {}, got {}",
                    table, other
                ))),
            })
            .collect()
    }

    async fn ensure_schema(&self, schema: &str) -> EtlResult<()> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn recreate_table(&self, definition: &TableDefinition) -> EtlResult<()> {
        let create = definition.create_table_sql()?;
        let drop = format!("DROP TABLE IF EXISTS {} CASCADE", definition.table.qualified());

        let mut tx = self.pool.begin().await?;
        sqlx::query(&drop).execute(&mut *tx).await?;
        sqlx::query(&create).execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(table = %definition.table, columns = definition.columns.len(), "Recreated table");
        Ok(())
    }

    async fn insert_row(&self, table: &TableRef, row: &Row) -> EtlResult<()> {
        if row.is_empty() {
            let sql = format!("INSERT INTO {} DEFAULT VALUES", table.qualified());
            sqlx::query(&sql).execute(&self.pool).await?;
            return Ok(());
        }

        let columns = row
            .keys()
            .map(|k| quote_identifier(k))
            .collect::<Vec<_>>()
            .join(", ");
        let qualified = table.qualified();
        let sql = format!(
            "INSERT INTO {qualified} ({columns}) \
             SELECT {columns} FROM jsonb_populate_record(NULL::{qualified}, $1)"
        );

        sqlx::query(&sql)
            .bind(Value::Object(row.clone()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn grant_read(&self, table: &TableRef, role: &str) -> EtlResult<()> {
        let sql = format!(
            "GRANT SELECT ON {} TO {}",
            table.qualified(),
            quote_identifier(role)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn grant_schema_read(&self, schema: &str, role: &str) -> EtlResult<()> {
        let schema = quote_identifier(schema);
        let role = quote_identifier(role);
        for sql in [
            format!("GRANT USAGE ON SCHEMA {} TO {}", schema, role),
            format!("GRANT SELECT ON ALL TABLES IN SCHEMA {} TO {}", schema, role),
            format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT SELECT ON TABLES TO {}",
                schema, role
            ),
        ] {
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn create_index(&self, table: &TableRef, index: &str, column: &str) -> EtlResult<()> {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_identifier(index),
            table.qualified(),
            quote_identifier(column)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

fn bulk_copy_error(plan: &CopyPlan, err: impl std::fmt::Display) -> EtlError {
    EtlError::BulkCopy {
        table: plan.target.to_string(),
        reason: err.to_string(),
    }
}

/// Bulk copy through the dblink extension of the silver database
pub struct DblinkCopier {
    silver: PgPool,
    /// libpq connection string of the bronze database
    bronze_conninfo: String,
}

impl DblinkCopier {
    /// Enable dblink in silver and remember how to reach bronze
    pub async fn new(silver: PgPool, bronze_conninfo: String) -> EtlResult<Self> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS dblink")
            .execute(&silver)
            .await?;
        info!("✓ dblink extension available");
        Ok(Self {
            silver,
            bronze_conninfo,
        })
    }
}

#[async_trait]
impl BulkCopier for DblinkCopier {
    async fn copy_rows(&self, plan: &CopyPlan) -> EtlResult<u64> {
        let sql = format!(
            "INSERT INTO {} ({}) SELECT * FROM dblink($1, $2) AS src({})",
            plan.target.qualified(),
            plan.target_column_list(),
            plan.record_definition()
        );

        let result = sqlx::query(&sql)
            .bind(&self.bronze_conninfo)
            .bind(plan.select_sql())
            .execute(&self.silver)
            .await
            .map_err(|e| bulk_copy_error(plan, e))?;

        Ok(result.rows_affected())
    }
}

/// Bulk copy by streaming COPY data between the two pools
pub struct CopyStreamCopier {
    bronze: PgPool,
    silver: PgPool,
}

impl CopyStreamCopier {
    pub fn new(bronze: PgPool, silver: PgPool) -> Self {
        Self { bronze, silver }
    }
}

#[async_trait]
impl BulkCopier for CopyStreamCopier {
    async fn copy_rows(&self, plan: &CopyPlan) -> EtlResult<u64> {
        let copy_out = format!("COPY ({}) TO STDOUT", plan.select_sql());
        let copy_in = format!(
            "COPY {} ({}) FROM STDIN",
            plan.target.qualified(),
            plan.target_column_list()
        );

        let mut source = self
            .bronze
            .copy_out_raw(&copy_out)
            .await
            .map_err(|e| bulk_copy_error(plan, e))?;
        let mut sink = self
            .silver
            .copy_in_raw(&copy_in)
            .await
            .map_err(|e| bulk_copy_error(plan, e))?;

        while let Some(chunk) = source.next().await {
            let sent = match chunk {
                Ok(bytes) => sink.send(bytes).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                sink.abort(e.to_string())
                    .await
                    .map_err(|abort_err| bulk_copy_error(plan, abort_err))?;
                return Err(bulk_copy_error(plan, e));
            }
        }

        sink.finish().await.map_err(|e| bulk_copy_error(plan, e))
    }
}

/// Tests against a live database; skipped unless `DREF_TEST_DATABASE_URL` is set
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::table::TableDefinition;
    use serde_json::json;

    async fn test_store() -> Option<PgTableStore> {
        let url = match std::env::var("DREF_TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("Skipping Postgres test: DREF_TEST_DATABASE_URL not set");
                return None;
            }
        };
        let pool = PgPool::connect(&url).await.ok()?;
        Some(PgTableStore::new(pool))
    }

    #[tokio::test]
    async fn test_round_trip_through_catalog() {
        let Some(store) = test_store().await else {
            return;
        };

        let table = TableRef::new("dref_store_test", "spells_phb");
        store.ensure_schema(&table.schema).await.unwrap();
        store
            .recreate_table(&TableDefinition::bronze(
                table.clone(),
                &["name".to_string(), "level".to_string()],
            ))
            .await
            .unwrap();

        let mut row = Row::new();
        row.insert("name".to_string(), json!("Fireball"));
        row.insert("level".to_string(), json!("3"));
        row.insert("json_data".to_string(), json!({"name": "Fireball", "level": 3}));
        store.insert_row(&table, &row).await.unwrap();

        let columns = store.table_columns(&table).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "name", "level", "json_data", "created_at", "updated_at"]
        );
        assert_eq!(columns[0].sql_type, "integer");

        assert_eq!(store.row_count(&table).await.unwrap(), 1);
        store.probe(&table).await.unwrap();

        let rows = store.fetch_rows(&table, "id", 10, 0).await.unwrap();
        assert_eq!(rows[0]["name"], json!("Fireball"));
        assert_eq!(rows[0]["json_data"]["level"], json!(3));

        let missing = TableRef::new("dref_store_test", "absent");
        assert!(!store.table_exists(&missing).await.unwrap());
        assert!(matches!(
            store.probe(&missing).await,
            Err(EtlError::Inaccessible { .. })
        ));

        sqlx::query("DROP SCHEMA dref_store_test CASCADE")
            .execute(store.pool())
            .await
            .unwrap();
    }
}
