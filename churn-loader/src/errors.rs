use crate::db::errors::StoreError;
use std::path::PathBuf;
use thiserror::Error as ThisError;

/// Fatal pipeline errors.
///
/// Row-level problems (dropped rows, rejected records) never surface here; they are counted in
/// [`crate::validation::ValidationReport`] and [`crate::writer::LoadResult`] instead.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Input file could not be opened or parsed
    #[error("Failed to read input file {}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Required input columns are absent
    #[error("Missing required columns: {missing:?}")]
    SchemaMismatch { missing: Vec<String> },

    /// The store could not be reached
    #[error("Database unavailable: {0}")]
    Unavailable(#[source] StoreError),

    /// Operator requested cancellation
    #[error("Load interrupted by operator")]
    Interrupted,
}

impl Error {
    /// Short category used in the failure banner and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config { .. } => "configuration",
            Error::Input { .. } => "input",
            Error::SchemaMismatch { .. } => "schema_mismatch",
            Error::Unavailable(_) => "connection",
            Error::Interrupted => "interrupted",
        }
    }
}

/// Type alias for pipeline results
pub type Result<T> = std::result::Result<T, Error>;
