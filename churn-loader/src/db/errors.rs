use sqlx::error::ErrorKind;
use thiserror::Error;

/// SQLSTATE classes that mean the server cannot serve us at all, as opposed to rejecting a row:
/// connection exception, invalid authorization, invalid catalog name, insufficient resources and
/// operator intervention.
const UNAVAILABLE_SQLSTATE_CLASSES: &[&str] = &["08", "28", "3D", "53", "57"];

/// Outcome of a failed store operation.
///
/// Everything except [`StoreError::Unavailable`] is a rejection of the submitted rows: the store
/// is reachable and another attempt with different rows can succeed.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Unique constraint violation (e.g. duplicate customer id)
    #[error("Unique constraint violation: {message}")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Check constraint violation (e.g. a label outside 0/1)
    #[error("Check constraint violation: {message}")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Not-null constraint violation
    #[error("Not-null constraint violation: {message}")]
    NotNullViolation { table: Option<String>, message: String },

    /// Foreign key constraint violation
    #[error("Foreign key constraint violation: {message}")]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Any other data-level rejection (type mismatch, value out of range, ...)
    #[error("Rejected by database: {message}")]
    Rejected { code: Option<String>, message: String },

    /// The store cannot be reached: I/O, TLS, authentication, pool exhaustion or shutdown
    #[error(transparent)]
    Unavailable(anyhow::Error),
}

impl StoreError {
    /// Whether the error ends the whole load rather than a single chunk or record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Convert from sqlx::Error using sqlx's error categorization plus SQLSTATE classes
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                if code
                    .as_deref()
                    .is_some_and(|c| UNAVAILABLE_SQLSTATE_CLASSES.iter().any(|class| c.starts_with(class)))
                {
                    return StoreError::Unavailable(anyhow::Error::from(err));
                }

                let constraint = db_err.constraint().map(|s| s.to_string());
                let table = db_err.table().map(|s| s.to_string());
                let message = db_err.message().to_string();

                match db_err.kind() {
                    ErrorKind::UniqueViolation => StoreError::UniqueViolation { constraint, table, message },
                    ErrorKind::CheckViolation => StoreError::CheckViolation { constraint, table, message },
                    ErrorKind::NotNullViolation => StoreError::NotNullViolation { table, message },
                    ErrorKind::ForeignKeyViolation => StoreError::ForeignKeyViolation { constraint, table, message },
                    _ => StoreError::Rejected { code, message },
                }
            }
            // Values we failed to bind or read back: the rows are at fault, not the connection
            sqlx::Error::Encode(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Rejected {
                code: None,
                message: err.to_string(),
            },
            // Io, Tls, Protocol, PoolTimedOut, PoolClosed, WorkerCrashed, Configuration, ...
            _ => StoreError::Unavailable(anyhow::Error::from(err)),
        }
    }
}

/// Type alias for store operation results
pub type Result<T> = std::result::Result<T, StoreError>;
