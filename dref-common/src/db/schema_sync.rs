//! Declarative table schemas
//!
//! Fixed bookkeeping tables are described in code with [`TableSchema`] and
//! brought up to date on startup:
//! 1. **CREATE TABLE IF NOT EXISTS** from the declared columns
//! 2. **Auto-sync** adds declared columns the live table lacks
//!
//! Type and constraint drift is reported but never altered in place.
//!
//! ```rust,ignore
//! pub struct ImportTrackingSchema;
//!
//! impl TableSchema for ImportTrackingSchema {
//!     fn table_name() -> &'static str { "import_tracking" }
//!
//!     fn expected_columns() -> Vec<ColumnDefinition> {
//!         vec![
//!             ColumnDefinition::new("id", "SERIAL").primary_key(),
//!             ColumnDefinition::new("file_path", "TEXT").not_null().unique(),
//!         ]
//!     }
//! }
//!
//! SchemaSync::ensure_table::<ImportTrackingSchema>(&pool).await?;
//! ```

use crate::identifier::quote_identifier;
use crate::Result;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    /// SQL type as written in DDL (e.g. "TEXT", "INTEGER", "SERIAL")
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// DEFAULT expression, spliced verbatim
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            unique: false,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Render as a column clause of CREATE TABLE / ADD COLUMN
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_identifier(&self.name), self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.not_null && !self.primary_key {
            sql.push_str(" NOT NULL");
        }
        if self.unique && !self.primary_key {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Live column as reported by `information_schema.columns`
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub ordinal: i32,
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
}

/// Difference between a declared and a live table
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDrift {
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Reported only; changing a column type needs a data migration
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    /// Reported only
    NullabilityMismatch { table: String, column: String },
}

/// Expected shape of one bookkeeping table
pub trait TableSchema {
    /// Schema holding the table
    fn schema_name() -> &'static str {
        "public"
    }

    fn table_name() -> &'static str;

    /// Declared columns, in creation order
    fn expected_columns() -> Vec<ColumnDefinition>;

    /// Multi-column UNIQUE constraints
    fn unique_constraints() -> Vec<Vec<&'static str>> {
        Vec::new()
    }

    /// CREATE TABLE IF NOT EXISTS statement for this table
    fn create_table_sql() -> String {
        let mut clauses: Vec<String> = Self::expected_columns()
            .iter()
            .map(ColumnDefinition::to_sql)
            .collect();

        for constraint in Self::unique_constraints() {
            let columns: Vec<String> = constraint.iter().map(|c| quote_identifier(c)).collect();
            clauses.push(format!("UNIQUE ({})", columns.join(", ")));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (\n    {}\n)",
            quote_identifier(Self::schema_name()),
            quote_identifier(Self::table_name()),
            clauses.join(",\n    ")
        )
    }
}

/// Reads live table layouts
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Columns of `schema.table` in ordinal order
    pub async fn introspect_table(
        pool: &PgPool,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ActualColumn>> {
        let rows = sqlx::query(
            r#"
            SELECT ordinal_position::INT4 AS ordinal, column_name, data_type,
                   is_nullable, column_default
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await?;

        let columns = rows
            .iter()
            .map(|row| ActualColumn {
                ordinal: row.get("ordinal"),
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                not_null: row.get::<String, _>("is_nullable") == "NO",
                default_value: row.get("column_default"),
            })
            .collect();

        Ok(columns)
    }

    pub async fn table_exists(pool: &PgPool, schema: &str, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }
}

/// Compares declared and live columns
pub struct SchemaDiff;

impl SchemaDiff {
    pub fn compare(
        table: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for expected_col in expected {
            match actual.iter().find(|c| c.name == expected_col.name) {
                Some(actual_col) => {
                    if !Self::types_compatible(&expected_col.sql_type, &actual_col.data_type) {
                        drift.push(SchemaDrift::TypeMismatch {
                            table: table.to_string(),
                            column: expected_col.name.clone(),
                            expected: expected_col.sql_type.clone(),
                            actual: actual_col.data_type.clone(),
                        });
                    }
                    let wants_not_null = expected_col.not_null || expected_col.primary_key;
                    if wants_not_null && !actual_col.not_null {
                        drift.push(SchemaDrift::NullabilityMismatch {
                            table: table.to_string(),
                            column: expected_col.name.clone(),
                        });
                    }
                }
                None => drift.push(SchemaDrift::MissingColumn {
                    table: table.to_string(),
                    column: expected_col.clone(),
                }),
            }
        }

        drift
    }

    /// Compare a DDL type name with the `information_schema` spelling
    fn types_compatible(expected: &str, actual: &str) -> bool {
        canonical_type(expected) == canonical_type(actual)
    }
}

fn canonical_type(sql_type: &str) -> String {
    let lower = sql_type.trim().to_ascii_lowercase();
    match lower.as_str() {
        "serial" | "int" | "int4" | "integer" => "integer".to_string(),
        "bigserial" | "int8" | "bigint" => "bigint".to_string(),
        "timestamp" | "timestamp without time zone" => "timestamp".to_string(),
        "timestamptz" | "timestamp with time zone" => "timestamptz".to_string(),
        "varchar" | "character varying" => "varchar".to_string(),
        "bool" | "boolean" => "boolean".to_string(),
        _ => lower,
    }
}

/// Applies declared schemas to the database
pub struct SchemaSync;

impl SchemaSync {
    /// Create the table if needed, then add any missing declared columns
    pub async fn ensure_table<T: TableSchema>(pool: &PgPool) -> Result<()> {
        sqlx::query(&T::create_table_sql()).execute(pool).await?;
        Self::sync_table::<T>(pool).await
    }

    /// Add missing columns; warn about drift that cannot be fixed in place
    pub async fn sync_table<T: TableSchema>(pool: &PgPool) -> Result<()> {
        let schema = T::schema_name();
        let table = T::table_name();

        if !SchemaIntrospector::table_exists(pool, schema, table).await? {
            warn!("Table {}.{} does not exist, nothing to sync", schema, table);
            return Ok(());
        }

        let actual = SchemaIntrospector::introspect_table(pool, schema, table).await?;
        let drift = SchemaDiff::compare(table, &T::expected_columns(), &actual);

        if drift.is_empty() {
            info!("✓ Schema up to date for {}.{}", schema, table);
            return Ok(());
        }

        for change in drift {
            match change {
                SchemaDrift::MissingColumn { column, .. } => {
                    Self::add_column(pool, schema, table, &column).await?;
                }
                SchemaDrift::TypeMismatch {
                    table,
                    column,
                    expected,
                    actual,
                } => {
                    warn!(
                        "⚠ Type mismatch in {}.{}: expected '{}', found '{}'",
                        table, column, expected, actual
                    );
                }
                SchemaDrift::NullabilityMismatch { table, column } => {
                    warn!("⚠ Column {}.{} is nullable but declared NOT NULL", table, column);
                }
            }
        }

        Ok(())
    }

    async fn add_column(
        pool: &PgPool,
        schema: &str,
        table: &str,
        column: &ColumnDefinition,
    ) -> Result<()> {
        // Existing rows would violate NOT NULL without a default
        let mut column = column.clone();
        if column.not_null && column.default_value.is_none() {
            warn!(
                "⚠ Adding {}.{} as nullable: NOT NULL needs a DEFAULT",
                table, column.name
            );
            column.not_null = false;
        }
        column.primary_key = false;

        let sql = format!(
            "ALTER TABLE {}.{} ADD COLUMN IF NOT EXISTS {}",
            quote_identifier(schema),
            quote_identifier(table),
            column.to_sql()
        );

        info!("✓ Adding column {}.{} ({})", table, column.name, column.sql_type);
        sqlx::query(&sql).execute(pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WidgetSchema;

    impl TableSchema for WidgetSchema {
        fn table_name() -> &'static str {
            "widgets"
        }

        fn expected_columns() -> Vec<ColumnDefinition> {
            vec![
                ColumnDefinition::new("id", "SERIAL").primary_key(),
                ColumnDefinition::new("name", "TEXT").not_null().unique(),
                ColumnDefinition::new("kind", "TEXT").not_null(),
                ColumnDefinition::new("count", "INTEGER").default("0"),
            ]
        }

        fn unique_constraints() -> Vec<Vec<&'static str>> {
            vec![vec!["name", "kind"]]
        }
    }

    fn actual(ordinal: i32, name: &str, data_type: &str, not_null: bool) -> ActualColumn {
        ActualColumn {
            ordinal,
            name: name.to_string(),
            data_type: data_type.to_string(),
            not_null,
            default_value: None,
        }
    }

    #[test]
    fn test_column_definition_sql() {
        assert_eq!(
            ColumnDefinition::new("id", "SERIAL").primary_key().to_sql(),
            "\"id\" SERIAL PRIMARY KEY"
        );
        assert_eq!(
            ColumnDefinition::new("status", "TEXT")
                .not_null()
                .default("'success'")
                .to_sql(),
            "\"status\" TEXT NOT NULL DEFAULT 'success'"
        );
    }

    #[test]
    fn test_create_table_sql_includes_constraints() {
        let sql = WidgetSchema::create_table_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"widgets\""));
        assert!(sql.contains("\"name\" TEXT NOT NULL UNIQUE"));
        assert!(sql.contains("UNIQUE (\"name\", \"kind\")"));
    }

    #[test]
    fn test_diff_detects_missing_column() {
        let live = vec![
            actual(1, "id", "integer", true),
            actual(2, "name", "text", true),
            actual(3, "kind", "text", true),
        ];
        let drift = SchemaDiff::compare("widgets", &WidgetSchema::expected_columns(), &live);
        assert_eq!(drift.len(), 1);
        assert!(matches!(
            &drift[0],
            SchemaDrift::MissingColumn { column, .. } if column.name == "count"
        ));
    }

    #[test]
    fn test_diff_reports_type_and_nullability() {
        let live = vec![
            actual(1, "id", "integer", true),
            actual(2, "name", "text", false),
            actual(3, "kind", "bigint", true),
            actual(4, "count", "integer", false),
        ];
        let drift = SchemaDiff::compare("widgets", &WidgetSchema::expected_columns(), &live);
        assert!(drift.contains(&SchemaDrift::NullabilityMismatch {
            table: "widgets".to_string(),
            column: "name".to_string(),
        }));
        assert!(drift.iter().any(|d| matches!(
            d,
            SchemaDrift::TypeMismatch { column, .. } if column == "kind"
        )));
    }

    #[test]
    fn test_serial_matches_integer() {
        assert!(SchemaDiff::types_compatible("SERIAL", "integer"));
        assert!(SchemaDiff::types_compatible("TIMESTAMP", "timestamp without time zone"));
        assert!(!SchemaDiff::types_compatible("TEXT", "jsonb"));
    }
}
