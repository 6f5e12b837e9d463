//! # churn-loader: batch loader for churn model predictions
//!
//! `churn-loader` reads a delimited file of customer churn predictions produced by two models
//! (logistic regression and gradient-boosted trees), validates and cleans it, and appends it to a
//! PostgreSQL table for downstream analytics.
//!
//! ## Pipeline
//!
//! A run is a single sequential pipeline driven by [`Loader`]:
//!
//! 1. **Connection check**: a minimal read against the output table. Its result is logged only;
//!    an unreachable database fails the run at the first write.
//! 2. **Read and validate** ([`input`], [`validation`]): every required column must be present.
//!    Fields are coerced explicitly and rows with missing or invalid values are dropped and
//!    reported.
//! 3. **Write** ([`writer`]): records are appended in transactional chunks. A rejected chunk is
//!    retried record by record so one bad record never costs its neighbours.
//! 4. **Report**: counts of attempted, inserted and failed records.
//!
//! Row-level problems are counted and never stop the run. Configuration errors, unreadable input,
//! missing columns, an unreachable database and operator interruption are fatal.
//!
//! ## Components
//!
//! - [`config`]: YAML file plus `DB_*` and `CHURN_LOADER_*` environment overrides
//! - [`db`]: connection provider, the [`db::handlers::PredictionStore`] seam and its stores
//! - [`errors`]: the pipeline's fatal error taxonomy
//! - [`telemetry`]: console logging and optional OTLP span export

pub mod config;
pub mod db;
pub mod errors;
pub mod input;
pub mod telemetry;
pub mod validation;
pub mod writer;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use errors::{Error, Result};

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::db::handlers::PredictionStore;
use crate::db::pool::ConnectionProvider;
use crate::input::RawTable;
use crate::validation::{ValidatedBatch, ValidationReport, ranked};
use crate::writer::{BatchWriter, LoadResult};

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    /// Whether the pre-load connection check succeeded
    pub preflight_ok: bool,
    pub validation: ValidationReport,
    /// All zeros in a dry run
    pub load: LoadResult,
    pub dry_run: bool,
}

/// Rejected records listed individually in the summary; the rest are counted
const MAX_LISTED_REJECTIONS: usize = 20;

/// The end-of-run report, one line per figure
impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let validation = &self.validation;
        let load = &self.load;

        writeln!(f, "Input rows:       {}", validation.input_rows)?;
        writeln!(f, "Dropped rows:     {}", validation.dropped_count())?;
        writeln!(f, "Out of range:     {}", validation.out_of_range)?;
        writeln!(f, "Risk categories:  {}", ranked(&validation.risk_distribution))?;
        writeln!(f, "XGB categories:   {}", ranked(&validation.xgb_risk_distribution))?;

        if self.dry_run {
            return writeln!(f, "Valid records:    {} (dry run, nothing written)", load.attempted);
        }

        writeln!(f, "Connection check: {}", if self.preflight_ok { "ok" } else { "failed" })?;
        writeln!(f, "Attempted:        {}", load.attempted)?;
        writeln!(f, "Inserted:         {}", load.inserted)?;
        writeln!(f, "Failed:           {}", load.failed)?;
        writeln!(f, "Chunks committed: {}", load.committed_chunks)?;
        writeln!(f, "Chunks retried:   {}", load.fallback_chunks)?;

        for rejected in load.rejected.iter().take(MAX_LISTED_REJECTIONS) {
            writeln!(f, "  rejected {}: {}", rejected.customer_id, rejected.message)?;
        }
        if load.rejected.len() > MAX_LISTED_REJECTIONS {
            writeln!(f, "  ... and {} more", load.rejected.len() - MAX_LISTED_REJECTIONS)?;
        }
        Ok(())
    }
}

/// Runs the load pipeline for one configuration.
pub struct Loader {
    config: Config,
}

impl Loader {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Load the configured input into the configured database.
    ///
    /// The connection pool is opened here and closed before returning, whatever the outcome.
    #[instrument(
        name = "load",
        skip_all,
        fields(input = %self.config.loader.input_path.display(), table = %self.config.database.qualified_table())
    )]
    pub async fn run(&self, cancel: CancellationToken) -> Result<LoadSummary> {
        let provider = ConnectionProvider::open(&self.config.database)?;
        let outcome = self.run_with(&provider, cancel).await;
        provider.close().await;
        outcome
    }

    async fn run_with(&self, provider: &ConnectionProvider, cancel: CancellationToken) -> Result<LoadSummary> {
        info!("Step 1: testing database connection");
        let preflight_ok = tokio::select! {
            ok = provider.test_connection() => ok,
            _ = cancel.cancelled() => return Err(Error::Interrupted),
        };
        if !preflight_ok {
            warn!("Database connection test failed, continuing with load");
        }

        self.load_into(provider.predictions(), preflight_ok, cancel).await
    }

    /// Read, validate and write into `store`.
    pub async fn load_into<S: PredictionStore>(&self, store: S, preflight_ok: bool, cancel: CancellationToken) -> Result<LoadSummary> {
        let batch = self.read_and_validate()?;

        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }

        info!("Step 3: inserting data into database");
        let load = BatchWriter::new(store)
            .with_cancellation(cancel)
            .write(&batch, self.config.loader.batch_size)
            .await?;

        let (_, validation) = batch.into_parts();
        Ok(LoadSummary {
            preflight_ok,
            validation,
            load,
            dry_run: false,
        })
    }

    /// Read and validate the input without touching the database.
    #[instrument(name = "dry_run", skip_all, fields(input = %self.config.loader.input_path.display()))]
    pub fn dry_run(&self) -> Result<LoadSummary> {
        let batch = self.read_and_validate()?;
        let attempted = batch.len();
        let (_, validation) = batch.into_parts();

        info!(records = attempted, "Dry run: nothing written");
        Ok(LoadSummary {
            validation,
            load: LoadResult {
                attempted,
                ..Default::default()
            },
            dry_run: true,
            ..Default::default()
        })
    }

    /// Open the pool, run the connection check, close the pool.
    pub async fn check_connection(&self) -> Result<bool> {
        let provider = ConnectionProvider::open(&self.config.database)?;
        let ok = provider.test_connection().await;
        provider.close().await;
        Ok(ok)
    }

    fn read_and_validate(&self) -> Result<ValidatedBatch> {
        let loader = &self.config.loader;
        let delimiter = u8::try_from(loader.delimiter).map_err(|_| Error::Config {
            message: format!("delimiter '{}' must be a single ASCII character", loader.delimiter),
        })?;

        info!("Step 2: loading and validating CSV data");
        let table = RawTable::from_path(&loader.input_path, delimiter)?;
        validation::validate(&table)
    }
}
