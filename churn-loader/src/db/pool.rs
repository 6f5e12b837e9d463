//! Connection provider for the target database.
//!
//! [`ConnectionProvider`] is constructed explicitly at the start of a run, handed to whoever needs
//! the database, and closed at the end. It owns a lazily-connected SQLx pool: nothing touches the
//! network until the first query, so credentials problems surface in
//! [`ConnectionProvider::test_connection`] rather than at construction.
//!
//! Every new physical connection runs a schema check before it is handed out. The check is
//! idempotent and its failure is logged but not fatal, so a role without `CREATE` privilege can
//! still load into a schema that already exists.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{ConnectOptions, Executor, PgConnection, PgPool};
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

use crate::config::DatabaseConfig;
use crate::db::handlers::Predictions;
use crate::errors::{Error, Result};

const APPLICATION_NAME: &str = "churn-loader";

/// Build the connection descriptor from configuration.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    if !matches!(config.driver.as_str(), "postgres" | "postgresql") {
        return Err(Error::Config {
            message: format!("unsupported driver '{}'", config.driver),
        });
    }

    let mut options = PgConnectOptions::new()
        .host(&config.server)
        .port(config.port)
        .database(&config.database)
        .username(&config.username)
        .ssl_mode(ssl_mode(config.trust_cert))
        .application_name(APPLICATION_NAME)
        .log_statements(log::LevelFilter::Debug)
        .log_slow_statements(log::LevelFilter::Warn, config.slow_statement_threshold);

    if !config.password.is_empty() {
        options = options.password(&config.password);
    }

    if let Some(timeout) = config.statement_timeout {
        options = options.options([("statement_timeout", timeout.as_millis().to_string())]);
    }

    Ok(options)
}

/// A trusted certificate is used without verification; otherwise the full chain and host name
/// are verified.
fn ssl_mode(trust_cert: bool) -> PgSslMode {
    if trust_cert { PgSslMode::Prefer } else { PgSslMode::VerifyFull }
}

/// Connection URL with the password replaced, the only form of the descriptor that gets logged.
pub fn redacted_url(config: &DatabaseConfig) -> String {
    let sslmode = if config.trust_cert { "prefer" } else { "verify-full" };
    let fallback = format!("{}://{}:{}/{}", config.driver, config.server, config.port, config.database);

    let Ok(mut url) = Url::parse(&fallback) else {
        return fallback;
    };
    // Both only fail for URLs that cannot carry credentials, which parse above rules out
    let _ = url.set_username(&config.username);
    if !config.password.is_empty() {
        let _ = url.set_password(Some("redacted"));
    }
    url.query_pairs_mut().append_pair("sslmode", sslmode);

    // Userinfo would percent-encode the angle brackets; the username is encoded so this is the password
    url.to_string().replacen(":redacted@", ":<redacted>@", 1)
}

/// Zero means "never" in configuration; SQLx expects `None` for that.
fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// Create the schema if it is missing. Runs server-side as one statement.
async fn ensure_schema(conn: &mut PgConnection, schema: &str) {
    let statement = format!(
        r#"
        DO $$
        BEGIN
            IF NOT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = '{schema}') THEN
                CREATE SCHEMA "{schema}";
            END IF;
        END
        $$
        "#
    );

    match conn.execute(statement.as_str()).await {
        Ok(_) => debug!(schema, "Schema ensured"),
        Err(e) => error!(schema, error = %e, "Error creating schema, continuing without it"),
    }
}

/// Pooled access to the target database.
#[derive(Clone, Debug)]
pub struct ConnectionProvider {
    pool: PgPool,
    /// Quoted `"schema"."table"`
    table: String,
}

impl ConnectionProvider {
    /// Configure the pool from configuration. Must be called inside a Tokio runtime.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let options = connect_options(config)?;
        let provider = Self::open_with(options, config);
        info!(
            url = %redacted_url(config),
            pool_size = config.pool.pool_size,
            max_connections = config.pool.max_connections(),
            "Connection pool configured"
        );
        Ok(provider)
    }

    /// Configure the pool with an explicit descriptor; pool settings and schema still come from
    /// `config`.
    pub fn open_with(options: PgConnectOptions, config: &DatabaseConfig) -> Self {
        let schema = config.schema.clone();

        let pool = PgPoolOptions::new()
            .min_connections(config.pool.pool_size)
            .max_connections(config.pool.max_connections())
            .acquire_timeout(config.pool.pool_timeout)
            .idle_timeout(non_zero(config.pool.idle_timeout))
            .max_lifetime(non_zero(config.pool.pool_recycle))
            .after_connect(move |conn, _meta| {
                let schema = schema.clone();
                Box::pin(async move {
                    ensure_schema(conn, &schema).await;
                    Ok(())
                })
            })
            .connect_lazy_with(options);

        Self {
            pool,
            table: config.qualified_table(),
        }
    }

    /// Repository for the configured output table
    pub fn predictions(&self) -> Predictions {
        Predictions::new(self.pool.clone(), self.table.clone())
    }

    /// Run a minimal read against the output table and report whether it worked.
    pub async fn test_connection(&self) -> bool {
        let query = format!("SELECT 1 FROM {} LIMIT 1", self.table);
        match sqlx::query(&query).fetch_optional(&self.pool).await {
            Ok(row) => {
                info!(table = %self.table, has_rows = row.is_some(), "Successfully connected to predictions table");
                true
            }
            Err(e) => {
                error!(table = %self.table, error = %e, "Error connecting to predictions table");
                false
            }
        }
    }

    /// Close all pooled connections. Waits for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Connection pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            server: "db.internal".to_string(),
            port: 6543,
            database: "churn".to_string(),
            username: "loader".to_string(),
            password: "hunter2".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_connect_options_from_config() {
        let options = connect_options(&config()).unwrap();

        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("churn"));
        assert_eq!(options.get_username(), "loader");
        assert_eq!(options.get_application_name(), Some(APPLICATION_NAME));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Prefer));
    }

    #[test]
    fn test_untrusted_cert_verifies() {
        let mut config = config();
        config.trust_cert = false;

        let options = connect_options(&config).unwrap();
        assert!(matches!(options.get_ssl_mode(), PgSslMode::VerifyFull));
    }

    #[test]
    fn test_unsupported_driver() {
        let mut config = config();
        config.driver = "mssql".to_string();

        assert!(matches!(connect_options(&config), Err(Error::Config { .. })));
    }

    #[test]
    fn test_redacted_url_hides_password() {
        let url = redacted_url(&config());

        assert!(!url.contains("hunter2"));
        assert_eq!(url, "postgres://loader:<redacted>@db.internal:6543/churn?sslmode=prefer");
    }

    #[test]
    fn test_redacted_url_username_cannot_fake_marker() {
        let mut config = config();
        config.username = "x:redacted@".to_string();

        let url = redacted_url(&config);
        assert!(!url.contains("hunter2"));
        assert_eq!(url, "postgres://x%3Aredacted%40:<redacted>@db.internal:6543/churn?sslmode=prefer");
    }

    #[test]
    fn test_redacted_url_without_password() {
        let mut config = config();
        config.password = String::new();
        config.trust_cert = false;

        assert_eq!(redacted_url(&config), "postgres://loader@db.internal:6543/churn?sslmode=verify-full");
    }

    #[test]
    fn test_non_zero() {
        assert_eq!(non_zero(Duration::ZERO), None);
        assert_eq!(non_zero(Duration::from_secs(5)), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_preflight() {
        let mut config = config();
        config.server = "127.0.0.1".to_string();
        config.port = 1;
        config.pool.pool_size = 1;
        config.pool.max_overflow = 0;
        config.pool.pool_timeout = Duration::from_millis(500);

        let provider = ConnectionProvider::open(&config).unwrap();
        assert!(!provider.test_connection().await);
        provider.close().await;
    }
}
