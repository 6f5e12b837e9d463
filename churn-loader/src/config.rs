//! Loader configuration management.
//!
//! Configuration is loaded from an optional YAML file with environment variable overrides. The
//! configuration file path defaults to `config.yaml` but can be specified via `-f` flag or
//! `CHURN_LOADER_CONFIG` environment variable. A missing file is not an error: every field has a
//! default, so the loader can be driven entirely from the environment.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **`DB_*` variables** - Flat connection variables (`DB_SERVER`, `DB_PASSWORD`, ...) that map
//!    onto the `database` section, plus `DB_BATCH_SIZE` which maps onto `loader.batch_size`
//! 3. **`CHURN_LOADER_*` variables** - Any field by path, using double underscores for nesting
//! 4. **Command line** - Positional input path and `--batch-size`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! DB_SERVER=db.internal
//! DB_DATABASE=customer_churn_analytics
//! DB_USERNAME=loader
//! DB_PASSWORD=...
//! DB_TRUST_CERT=no
//! DB_SCHEMA=analytics
//! DB_BATCH_SIZE=500
//!
//! # Nested values
//! CHURN_LOADER_DATABASE__POOL__POOL_SIZE=8
//! CHURN_LOADER_DATABASE__POOL__POOL_TIMEOUT=45s
//! CHURN_LOADER_LOADER__DELIMITER=";"
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, num::NonZeroUsize, path::PathBuf, time::Duration};

use crate::errors::Error;

/// Longest identifier PostgreSQL keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Flat `DB_*` variables holding text, and the `database` field each one sets.
const DB_TEXT_VARS: [(&str, &str); 7] = [
    ("DB_DRIVER", "driver"),
    ("DB_SERVER", "server"),
    ("DB_DATABASE", "database"),
    ("DB_USERNAME", "username"),
    ("DB_PASSWORD", "password"),
    ("DB_SCHEMA", "schema"),
    ("DB_TABLE", "table"),
];

/// Command line arguments.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CHURN_LOADER_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Prediction file to load (overrides `loader.input_path`)
    pub input: Option<PathBuf>,

    /// Records per transactional chunk (overrides `loader.batch_size`)
    #[arg(long)]
    pub batch_size: Option<NonZeroUsize>,

    /// Validate configuration and exit without touching the database.
    #[arg(long)]
    pub validate: bool,

    /// Run the connection preflight only and exit with its result.
    #[arg(long, conflicts_with = "dry_run")]
    pub check_connection: bool,

    /// Read and validate the input file, report, and write nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Target database and connection pool
    pub database: DatabaseConfig,
    /// Input file and batching
    pub loader: LoaderConfig,
    /// Enable OpenTelemetry OTLP export of the load's spans
    pub enable_otel_export: bool,
}

/// Connection settings for the target PostgreSQL database.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// URL scheme of the driver; only `postgres`/`postgresql` are supported
    pub driver: String,
    /// Database server host name
    pub server: String,
    pub port: u16,
    /// Database name
    #[serde(deserialize_with = "deserialize_text")]
    pub database: String,
    #[serde(deserialize_with = "deserialize_text")]
    pub username: String,
    /// Never serialized, never logged
    #[serde(deserialize_with = "deserialize_text", skip_serializing)]
    pub password: String,
    /// Accept the server certificate without verification (`yes`/`no`)
    #[serde(deserialize_with = "deserialize_flag")]
    pub trust_cert: bool,
    /// Namespace the output table lives in, created on first connection if missing
    pub schema: String,
    /// Output table name
    pub table: String,
    /// Statements slower than this are logged at warn level
    #[serde(with = "humantime_serde")]
    pub slow_statement_threshold: Duration,
    /// Server-side statement timeout applied to every session
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub statement_timeout: Option<Duration>,
    pub pool: PoolSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "postgres".to_string(),
            server: "localhost".to_string(),
            port: 5432,
            database: "customer_churn_analytics".to_string(),
            username: "postgres".to_string(),
            password: String::new(),
            trust_cert: true,
            schema: "public".to_string(),
            table: "customer_predictions".to_string(),
            slow_statement_threshold: Duration::from_secs(1),
            statement_timeout: None,
            pool: PoolSettings::default(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("trust_cert", &self.trust_cert)
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("slow_statement_threshold", &self.slow_statement_threshold)
            .field("statement_timeout", &self.statement_timeout)
            .field("pool", &self.pool)
            .finish()
    }
}

impl DatabaseConfig {
    /// `"schema"."table"`, safe to interpolate once [`Config::validate`] has passed.
    pub fn qualified_table(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }
}

/// Connection pool sizing and lifetimes.
///
/// `pool_size` connections are kept warm; up to `max_overflow` more are opened under load.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Physical connections kept open
    pub pool_size: u32,
    /// Additional connections allowed on top of `pool_size`
    pub max_overflow: u32,
    /// Maximum wait for a connection (also bounds connection establishment)
    #[serde(with = "humantime_serde")]
    pub pool_timeout: Duration,
    /// Connections older than this are closed and replaced
    #[serde(with = "humantime_serde")]
    pub pool_recycle: Duration,
    /// Idle connections above `pool_size` are closed after this long
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: 5,
            max_overflow: 10,
            pool_timeout: Duration::from_secs(30),
            pool_recycle: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolSettings {
    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow)
    }
}

/// Input file and write batching.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Delimited prediction file with a header row
    pub input_path: PathBuf,
    /// Records per transactional chunk
    pub batch_size: NonZeroUsize,
    /// Field delimiter of the input file
    pub delimiter: char,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("combined_model_predictions.csv"),
            batch_size: NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN),
            delimiter: ',',
        }
    }
}

/// Environment values arrive typed (`12345` is a number, `true` a bool); credentials are text.
fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        Str(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Text::deserialize(deserializer)? {
        Text::Str(s) => s,
        Text::Int(i) => i.to_string(),
        Text::Float(f) => f.to_string(),
        Text::Bool(b) => b.to_string(),
    })
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(1) => Ok(true),
        Flag::Int(0) => Ok(false),
        Flag::Int(other) => Err(serde::de::Error::custom(format!("expected yes/no, found {other}"))),
        Flag::Str(s) => parse_flag(&s).ok_or_else(|| serde::de::Error::custom(format!("expected yes/no, found '{s}'"))),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "on" | "1" => Some(true),
        "no" | "n" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn is_plain_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }

    let mut chars = name.chars();
    let starts_well = chars.next().is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    starts_well && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(input) = &args.input {
            config.loader.input_path = input.clone();
        }
        if let Some(batch_size) = args.batch_size {
            config.loader.batch_size = batch_size;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        let db = &self.database;

        if !matches!(db.driver.as_str(), "postgres" | "postgresql") {
            return Err(Error::Config {
                message: format!("unsupported driver '{}': only 'postgres' is available", db.driver),
            });
        }

        if db.server.trim().is_empty() {
            return Err(Error::Config {
                message: "database server must not be empty".to_string(),
            });
        }

        // Schema and table are interpolated into DDL, so they must be plain identifiers
        for (field, value) in [("schema", &db.schema), ("table", &db.table)] {
            if !is_plain_identifier(value) {
                return Err(Error::Config {
                    message: format!(
                        "database {field} '{value}' must start with a letter or underscore, contain only ASCII letters, \
                         digits and underscores, and be at most {MAX_IDENTIFIER_LEN} bytes"
                    ),
                });
            }
        }

        if db.pool.pool_size == 0 {
            return Err(Error::Config {
                message: "pool_size cannot be 0".to_string(),
            });
        }

        if db.pool.pool_timeout.is_zero() {
            return Err(Error::Config {
                message: "pool_timeout must be positive".to_string(),
            });
        }

        if !self.loader.delimiter.is_ascii() {
            return Err(Error::Config {
                message: format!("delimiter '{}' must be a single ASCII character", self.loader.delimiter),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        // Load base config file
        let mut figment = Figment::new().merge(Yaml::file(&args.config)).merge(
            Env::prefixed("DB_")
                .only(&["port", "trust_cert"])
                .map(|key| format!("database.{key}").into()),
        );

        // Env parses values, which would turn a password like `0123` into the number 123
        for (var, field) in DB_TEXT_VARS {
            if let Some(value) = Env::var(var) {
                figment = figment.merge(Serialized::default(&format!("database.{field}"), value));
            }
        }

        figment
            .merge(Env::raw().only(&["DB_BATCH_SIZE"]).map(|_| "loader.batch_size".into()))
            // Any value by path
            .merge(Env::prefixed("CHURN_LOADER_").ignore(&["config"]).split("__"))
    }
}
