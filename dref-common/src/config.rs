//! Configuration loading
//!
//! Resolution priority, highest first:
//! 1. Command-line argument (applied by the binary after [`EtlConfig::load`])
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default
//!
//! A missing default config file is not an error: defaults are used and a
//! warning is logged. A config file named explicitly (flag or `DREF_CONFIG`)
//! must exist.

use crate::identifier::is_valid_identifier;
use crate::{Error, Result};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DREF_CONFIG";

/// Connection parameters for one Postgres database
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DatabaseConfig {
    fn with_defaults(host: &str, name: &str) -> Self {
        Self {
            host: host.to_string(),
            port: 5432,
            name: name.to_string(),
            user: "postgres".to_string(),
            password: String::new(),
        }
    }

    /// sqlx connect options for this database
    pub fn connect_options(&self) -> PgConnectOptions {
        self.connect_options_for(&self.name)
    }

    /// sqlx connect options for another database on the same server
    ///
    /// Used to reach the `postgres` maintenance database when the target
    /// database has to be created first.
    pub fn connect_options_for(&self, database: &str) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(database);
        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }

    /// libpq connection string (`host=… port=… dbname=…`), as dblink expects
    pub fn conninfo(&self) -> String {
        fn quote(value: &str) -> String {
            format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
        }
        let mut parts = vec![
            format!("host={}", quote(&self.host)),
            format!("port={}", self.port),
            format!("dbname={}", quote(&self.name)),
            format!("user={}", quote(&self.user)),
        ];
        if !self.password.is_empty() {
            parts.push(format!("password={}", quote(&self.password)));
        }
        parts.join(" ")
    }

    /// Log-safe description (no password)
    pub fn describe(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.name)
    }
}

/// Read-only role granted SELECT on every table the pipeline creates
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadRoleConfig {
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Mechanism used to move rows from bronze to silver in one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkCopyMethod {
    /// `INSERT … SELECT * FROM dblink(…)` executed in the silver database
    Dblink,
    /// `COPY … TO STDOUT` on bronze streamed into `COPY … FROM STDIN` on silver
    CopyStream,
}

impl std::str::FromStr for BulkCopyMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "dblink" => Ok(Self::Dblink),
            "copy_stream" => Ok(Self::CopyStream),
            other => Err(Error::Config(format!("Unknown bulk copy method: {}", other))),
        }
    }
}

/// Bronze → silver pipeline behaviour
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Schemas processed when none can be discovered in bronze
    pub default_schemas: Vec<String>,
    /// Schema whose tables are copied one by one instead of fused
    pub flat_schema: String,
    /// Fusion target names that differ from `fusion_<schema>`
    pub fusion_name_overrides: BTreeMap<String, String>,
    /// Rows per batch in the chunked copy fallback
    pub copy_batch_size: i64,
    pub bulk_copy_method: BulkCopyMethod,
    /// Leading document path component stripped before deriving schema/table
    pub path_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let default_schemas = [
            "main", "bestiary", "class", "spells", "items", "rules", "races", "book", "adventure",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut fusion_name_overrides = BTreeMap::new();
        fusion_name_overrides.insert("bestiary".to_string(), "fusion_monsters".to_string());

        Self {
            default_schemas,
            flat_schema: "main".to_string(),
            fusion_name_overrides,
            copy_batch_size: 100,
            bulk_copy_method: BulkCopyMethod::Dblink,
            path_prefix: "data/".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Fusion target for tables prefixed with `<schema>_`
    pub fn fusion_table_name(&self, schema: &str) -> String {
        self.fusion_name_overrides
            .get(schema)
            .cloned()
            .unwrap_or_else(|| format!("fusion_{}", schema))
    }

    /// Fusion target for tables prefixed with `fluff_<schema>_`
    pub fn fluff_fusion_table_name(&self, schema: &str) -> String {
        format!("fusion_fluff_{}", schema)
    }
}

/// Connection retry policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_attempts: u32,
    pub retry_interval_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            retry_interval_secs: 5,
        }
    }
}

/// Readiness gate polling settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Required silver tables as `schema.table`
    pub required_tables: Vec<String>,
    pub max_attempts: u32,
    pub interval_secs: u64,
    /// Succeed with a warning when tables are still missing (development mode)
    pub allow_missing: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            required_tables: vec![
                "bestiary.fusion_monsters".to_string(),
                "spells.fusion_spells".to_string(),
                "class.fusion_class".to_string(),
                "main.tables".to_string(),
                "main.trapshazards".to_string(),
            ],
            max_attempts: 60,
            interval_secs: 10,
            allow_missing: false,
        }
    }
}

impl ReadinessConfig {
    /// Parse `required_tables` into (schema, table) pairs
    pub fn required_pairs(&self) -> Result<Vec<(String, String)>> {
        self.required_tables
            .iter()
            .map(|entry| match entry.split_once('.') {
                Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
                    Ok((schema.to_string(), table.to_string()))
                }
                _ => Err(Error::Config(format!(
                    "Required table must be written as schema.table: {:?}",
                    entry
                ))),
            })
            .collect()
    }
}

/// Database section of the TOML file; absent keys keep the layer default
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseToml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DatabaseToml {
    fn apply_to(self, target: &mut DatabaseConfig) {
        if let Some(v) = self.host {
            target.host = v;
        }
        if let Some(v) = self.port {
            target.port = v;
        }
        if let Some(v) = self.name {
            target.name = v;
        }
        if let Some(v) = self.user {
            target.user = v;
        }
        if let Some(v) = self.password {
            target.password = v;
        }
    }
}

/// On-disk TOML layout
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub bronze: DatabaseToml,
    pub silver: DatabaseToml,
    pub read_role: Option<ReadRoleConfig>,
    pub source_dir: Option<PathBuf>,
    pub pipeline: Option<PipelineConfig>,
    pub connection: Option<ConnectionConfig>,
    pub readiness: Option<ReadinessConfig>,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EtlConfig {
    pub bronze: DatabaseConfig,
    pub silver: DatabaseConfig,
    pub read_role: Option<ReadRoleConfig>,
    /// Root directory walked for `*.json` documents
    pub source_dir: PathBuf,
    pub pipeline: PipelineConfig,
    pub connection: ConnectionConfig,
    pub readiness: ReadinessConfig,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            bronze: DatabaseConfig::with_defaults("datareference_bronze_postgres", "bronze_db"),
            silver: DatabaseConfig::with_defaults("datareference_silver_postgres", "silver_db"),
            read_role: None,
            source_dir: PathBuf::from("/app/data"),
            pipeline: PipelineConfig::default(),
            connection: ConnectionConfig::default(),
            readiness: ReadinessConfig::default(),
        }
    }
}

impl EtlConfig {
    /// Load configuration: TOML file (if any), then environment overrides
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self> {
        let explicit = cli_config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Self::from_toml_file(&path)?
            }
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_toml_file(&path)?,
                None => {
                    warn!("No config file found, using compiled defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config file: {}", path.display());
        Ok(config)
    }

    /// Parse TOML text; absent keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        let mut config = Self::default();
        file.bronze.apply_to(&mut config.bronze);
        file.silver.apply_to(&mut config.silver);
        if file.read_role.is_some() {
            config.read_role = file.read_role;
        }
        if let Some(dir) = file.source_dir {
            config.source_dir = dir;
        }
        if let Some(pipeline) = file.pipeline {
            config.pipeline = pipeline;
        }
        if let Some(connection) = file.connection {
            config.connection = connection;
        }
        if let Some(readiness) = file.readiness {
            config.readiness = readiness;
        }
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    ///
    /// Takes a lookup function instead of reading the process environment so
    /// the override rules can be exercised without mutating global state.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BRONZE_DB_HOST") {
            self.bronze.host = v;
        }
        if let Some(v) = lookup("BRONZE_DB_PORT") {
            self.bronze.port = parse_port("BRONZE_DB_PORT", &v)?;
        }
        if let Some(v) = lookup("BRONZE_DB_NAME") {
            self.bronze.name = v;
        }
        if let Some(v) = lookup("SILVER_DB_HOST") {
            self.silver.host = v;
        }
        if let Some(v) = lookup("SILVER_DB_PORT") {
            self.silver.port = parse_port("SILVER_DB_PORT", &v)?;
        }
        if let Some(v) = lookup("SILVER_DB_NAME") {
            self.silver.name = v;
        }

        // One admin account serves both databases
        if let Some(v) = lookup("DB_ADMIN_USER") {
            self.bronze.user = v.clone();
            self.silver.user = v;
        }
        if let Some(v) = lookup("DB_ADMIN_PASSWORD") {
            self.bronze.password = v.clone();
            self.silver.password = v;
        }

        if let Some(user) = lookup("DB_READ_USER").filter(|u| !u.is_empty()) {
            let password = lookup("DB_READ_PASSWORD")
                .or_else(|| self.read_role.as_ref().map(|r| r.password.clone()))
                .unwrap_or_default();
            self.read_role = Some(ReadRoleConfig { user, password });
        }

        if let Some(v) = lookup("DREF_SOURCE_DIR") {
            self.source_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DREF_BULK_COPY_METHOD") {
            self.pipeline.bulk_copy_method = v.parse()?;
        }
        if lookup("ENVIRONMENT").is_some_and(|v| v == "development") {
            self.readiness.allow_missing = true;
        }

        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.copy_batch_size <= 0 {
            return Err(Error::Config(format!(
                "copy_batch_size must be positive, got {}",
                self.pipeline.copy_batch_size
            )));
        }
        if self.connection.max_attempts == 0 {
            return Err(Error::Config("connection.max_attempts must be at least 1".to_string()));
        }
        if self.readiness.max_attempts == 0 {
            return Err(Error::Config("readiness.max_attempts must be at least 1".to_string()));
        }
        if !is_valid_identifier(&self.pipeline.flat_schema) {
            return Err(Error::Config(format!(
                "flat_schema is not a valid identifier: {:?}",
                self.pipeline.flat_schema
            )));
        }
        if let Some(role) = &self.read_role {
            if !is_valid_identifier(&role.user) {
                return Err(Error::Config(format!(
                    "read role is not a valid identifier: {:?}",
                    role.user
                )));
            }
        }
        for (schema, target) in &self.pipeline.fusion_name_overrides {
            if !is_valid_identifier(target) {
                return Err(Error::Config(format!(
                    "fusion name override for {} is not a valid identifier: {:?}",
                    schema, target
                )));
            }
        }
        self.readiness.required_pairs()?;
        Ok(())
    }

    /// Read role name, if one is configured
    pub fn read_role_name(&self) -> Option<&str> {
        self.read_role.as_ref().map(|r| r.user.as_str())
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} is not a valid port: {:?}", key, value)))
}

/// `<config dir>/dref/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dref").join("config.toml"))
}
