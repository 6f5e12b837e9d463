//! Stores for prediction rows.
//!
//! [`PredictionStore`] is the seam between the batch writer and the database. The writer only
//! ever appends; a store must make [`PredictionStore::append_chunk`] all-or-nothing so a rejected
//! chunk can be retried record by record without duplicating rows.

pub mod in_memory;
pub mod predictions;

pub use in_memory::InMemoryPredictionStore;
pub use predictions::Predictions;

use crate::db::errors::Result;
use crate::db::models::predictions::PredictionRow;

/// Append-only store for stamped prediction rows
#[async_trait::async_trait]
pub trait PredictionStore: Send + Sync {
    /// Create the output table if it does not exist yet
    async fn ensure_table(&self) -> Result<()>;

    /// Append every row in one transaction, returning the number of rows stored.
    ///
    /// # Errors
    /// - Any rejection leaves the store unchanged
    /// - [`crate::db::errors::StoreError::Unavailable`] if the store cannot be reached
    async fn append_chunk(&self, rows: &[PredictionRow]) -> Result<u64>;

    /// Append a single row
    async fn append_one(&self, row: &PredictionRow) -> Result<()> {
        self.append_chunk(std::slice::from_ref(row)).await.map(|_| ())
    }
}
