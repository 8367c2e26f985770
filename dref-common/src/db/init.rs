//! Database connection bootstrap
//!
//! Connecting is the only step whose failure ends a run. Every attempt is
//! retried with a fixed backoff; a missing database is created on the fly
//! through the `postgres` maintenance database.

use crate::config::{ConnectionConfig, DatabaseConfig, ReadRoleConfig};
use crate::identifier::{quote_identifier, quote_literal};
use crate::{Error, Result};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Connection;
use std::time::Duration;
use tracing::{error, info, warn};

/// SQLSTATE raised when connecting to a database that does not exist
const INVALID_CATALOG_NAME: &str = "3D000";

/// Fixed-backoff retry policy for establishing connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl From<&ConnectionConfig> for RetryPolicy {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            interval: Duration::from_secs(config.retry_interval_secs),
        }
    }
}

/// Open a connection pool, retrying until the policy is exhausted
///
/// **Algorithm:**
/// 1. Try to connect
/// 2. If Postgres reports the database is missing, create it and retry
/// 3. Other errors: log, sleep for the policy interval, retry
/// 4. After `max_attempts` failures return the last error
pub async fn connect_with_retry(db: &DatabaseConfig, policy: &RetryPolicy) -> Result<PgPool> {
    info!("Connecting to {}", db.describe());

    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let result = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(db.connect_options())
            .await;

        match result {
            Ok(pool) => {
                info!(database = %db.name, attempt, "✓ Connected to {}", db.describe());
                return Ok(pool);
            }
            Err(err) => {
                if is_missing_database(&err) {
                    match create_database(db).await {
                        Ok(()) => info!(database = %db.name, "Created missing database"),
                        Err(e) => warn!(database = %db.name, "Could not create database: {}", e),
                    }
                }

                if attempt >= policy.max_attempts {
                    error!(
                        database = %db.name,
                        attempt,
                        "Giving up connecting to {}: {}",
                        db.describe(),
                        err
                    );
                    return Err(Error::Database(err));
                }

                warn!(
                    database = %db.name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Connection failed, retrying in {:?}: {}",
                    policy.interval,
                    err
                );
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}

/// Check whether a connect error means the target database is missing
pub fn is_missing_database(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(INVALID_CATALOG_NAME),
        _ => false,
    }
}

/// Create `db.name` through the `postgres` maintenance database
pub async fn create_database(db: &DatabaseConfig) -> Result<()> {
    let mut conn = PgConnection::connect_with(&db.connect_options_for("postgres")).await?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(&db.name)
            .fetch_one(&mut conn)
            .await?;

    if !exists {
        let sql = format!("CREATE DATABASE {}", quote_identifier(&db.name));
        sqlx::query(&sql).execute(&mut conn).await?;
    }

    conn.close().await?;
    Ok(())
}

/// Create the read-only login role if missing and let it connect to `database`
pub async fn ensure_read_role(pool: &PgPool, role: &ReadRoleConfig, database: &str) -> Result<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_roles WHERE rolname = $1)")
            .bind(&role.user)
            .fetch_one(pool)
            .await?;

    if exists {
        info!(role = %role.user, "Read role already exists");
    } else {
        // Utility statements take no bind parameters
        let sql = format!(
            "CREATE ROLE {} WITH LOGIN PASSWORD {}",
            quote_identifier(&role.user),
            quote_literal(&role.password)
        );
        sqlx::query(&sql).execute(pool).await?;
        info!(role = %role.user, "✓ Created read role");
    }

    let grant = format!(
        "GRANT CONNECT ON DATABASE {} TO {}",
        quote_identifier(database),
        quote_identifier(&role.user)
    );
    sqlx::query(&grant).execute(pool).await?;

    Ok(())
}
