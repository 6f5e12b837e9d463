//! Chunked batch writer with per-record fallback.
//!
//! Records are written in contiguous chunks of at most `batch_size`. Each chunk is one
//! transactional append; when the store rejects it, every record of that chunk is retried on its
//! own so a single bad record costs only itself. Rejections are counted and the load carries on;
//! an unreachable store stops the write immediately.

use std::fmt;
use std::num::NonZeroUsize;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::db::errors::StoreError;
use crate::db::handlers::PredictionStore;
use crate::db::models::predictions::PredictionRow;
use crate::errors::{Error, Result};
use crate::validation::ValidatedBatch;

/// Result of the fast path for one chunk
#[derive(Debug)]
pub enum ChunkOutcome {
    /// All rows committed
    Committed(usize),
    /// The store rejected the chunk; nothing from it was written
    Rejected(StoreError),
}

/// A record the store refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub customer_id: String,
    pub message: String,
}

/// Counts for one write.
///
/// `inserted + failed == attempted` once a write returns successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadResult {
    pub attempted: usize,
    pub inserted: usize,
    pub failed: usize,
    /// Chunks written in a single transaction
    pub committed_chunks: usize,
    /// Chunks retried record by record
    pub fallback_chunks: usize,
    pub rejected: Vec<RejectedRecord>,
}

impl LoadResult {
    pub fn is_complete(&self) -> bool {
        self.inserted + self.failed == self.attempted
    }
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempted {}, inserted {}, failed {} ({} chunks committed, {} retried per record)",
            self.attempted, self.inserted, self.failed, self.committed_chunks, self.fallback_chunks
        )
    }
}

/// Writes validated batches into a [`PredictionStore`].
pub struct BatchWriter<S> {
    store: S,
    cancel: CancellationToken,
}

impl<S: PredictionStore> BatchWriter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between chunks once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Write every record of `batch`, in order, in chunks of at most `batch_size`.
    ///
    /// # Errors
    /// - [`Error::Unavailable`] if the store cannot be reached at any point
    /// - [`Error::Interrupted`] if cancelled; chunks already written stay written
    #[instrument(skip_all, fields(total = batch.len(), batch_size = batch_size.get()))]
    pub async fn write(&self, batch: &ValidatedBatch, batch_size: NonZeroUsize) -> Result<LoadResult> {
        let records = batch.records();
        let total = records.len();
        let mut result = LoadResult {
            attempted: total,
            ..Default::default()
        };

        if records.is_empty() {
            info!("No records to insert");
            return Ok(result);
        }

        // One timestamp for the whole invocation
        let started_at = Utc::now();

        match self.store.ensure_table().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(Error::Unavailable(e)),
            Err(e) => warn!(error = %e, "Could not create predictions table, assuming it exists"),
        }

        let chunk_count = total.div_ceil(batch_size.get());
        info!(total, chunks = chunk_count, "Inserting records");

        for (index, chunk) in records.chunks(batch_size.get()).enumerate() {
            if self.cancel.is_cancelled() {
                warn!(inserted = result.inserted, failed = result.failed, total, "Load cancelled between chunks");
                return Err(Error::Interrupted);
            }

            let rows: Vec<PredictionRow> = chunk.iter().map(|r| r.stamp(started_at)).collect();

            match self.attempt_chunk(&rows).await? {
                ChunkOutcome::Committed(n) => {
                    result.inserted += n;
                    result.committed_chunks += 1;
                    info!(
                        chunk = index + 1,
                        chunks = chunk_count,
                        inserted = result.inserted,
                        total,
                        "Inserted {}/{} records",
                        result.inserted,
                        total
                    );
                }
                ChunkOutcome::Rejected(e) => {
                    result.fallback_chunks += 1;
                    error!(chunk = index + 1, error = %e, "Error inserting chunk, retrying records individually");
                    self.fallback(&rows, &mut result).await?;
                }
            }
        }

        info!(inserted = result.inserted, failed = result.failed, total, "Data insertion completed");
        if result.failed > 0 {
            warn!(failed = result.failed, "Some records could not be inserted");
        }

        Ok(result)
    }

    /// The fast path: one transaction for the whole chunk.
    async fn attempt_chunk(&self, rows: &[PredictionRow]) -> Result<ChunkOutcome> {
        match self.store.append_chunk(rows).await {
            Ok(_) => Ok(ChunkOutcome::Committed(rows.len())),
            Err(e) if e.is_fatal() => Err(Error::Unavailable(e)),
            Err(e) => Ok(ChunkOutcome::Rejected(e)),
        }
    }

    async fn fallback(&self, rows: &[PredictionRow], result: &mut LoadResult) -> Result<()> {
        for row in rows {
            match self.store.append_one(row).await {
                Ok(()) => result.inserted += 1,
                Err(e) if e.is_fatal() => return Err(Error::Unavailable(e)),
                Err(e) => {
                    error!(customer_id = %row.record.customer_id, error = %e, "Error inserting record");
                    result.failed += 1;
                    result.rejected.push(RejectedRecord {
                        customer_id: row.record.customer_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::InMemoryPredictionStore;
    use crate::test_utils::{sample_record, sample_records};
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> InMemoryPredictionStore {
        InMemoryPredictionStore::new()
    }

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    async fn run_test_duplicate_in_chunk<S: PredictionStore>(store: S) -> LoadResult {
        let batch = ValidatedBatch::from_records(vec![sample_record("C-1"), sample_record("C-1")]);
        let result = BatchWriter::new(store).write(&batch, size(2)).await.unwrap();

        assert_eq!(result.inserted, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.fallback_chunks, 1);
        assert_eq!(result.rejected[0].customer_id, "C-1");
        result
    }

    #[rstest]
    #[tokio::test]
    async fn test_duplicate_in_chunk(store: InMemoryPredictionStore) {
        run_test_duplicate_in_chunk(store.clone()).await;
        assert_eq!(store.customer_ids(), vec!["C-1".to_string()]);
    }

    async fn run_test_bad_record_isolated<S: PredictionStore>(store: S) -> LoadResult {
        let mut records = sample_records(10);
        records[4].xgb_prediction = 7;
        let batch = ValidatedBatch::from_records(records);

        let result = BatchWriter::new(store).write(&batch, size(4)).await.unwrap();

        assert_eq!(result.inserted, 9);
        assert_eq!(result.failed, 1);
        assert_eq!(result.committed_chunks, 2);
        assert_eq!(result.fallback_chunks, 1);
        assert_eq!(result.rejected[0].customer_id, "C-00004");
        result
    }

    #[rstest]
    #[tokio::test]
    async fn test_bad_record_isolated(store: InMemoryPredictionStore) {
        run_test_bad_record_isolated(store.clone()).await;

        assert_eq!(store.len(), 9);
        // Three chunks on the fast path, four retries for the rejected one
        assert_eq!(store.chunk_attempts(), 3);
        assert_eq!(store.single_attempts(), 4);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(7)]
    #[case(1000)]
    #[tokio::test]
    async fn test_counts_add_up(store: InMemoryPredictionStore, #[case] batch_size: usize) {
        let mut records = sample_records(20);
        records[2].customer_id = "C-00001".to_string();
        records[11].actual_churn = -1;
        records[19].lr_prediction = 2;
        store.reject_key("C-00015");

        let batch = ValidatedBatch::from_records(records);
        let result = BatchWriter::new(store.clone()).write(&batch, size(batch_size)).await.unwrap();

        assert!(result.is_complete());
        assert_eq!(result.attempted, 20);
        assert_eq!(result.failed, 4);
        assert_eq!(store.len(), 16);
    }

    #[rstest]
    #[tokio::test]
    async fn test_order_preserved(store: InMemoryPredictionStore) {
        let batch = ValidatedBatch::from_records(sample_records(5));

        BatchWriter::new(store.clone()).write(&batch, size(2)).await.unwrap();

        let expected: Vec<String> = batch.records().iter().map(|r| r.customer_id.clone()).collect();
        assert_eq!(store.customer_ids(), expected);
    }

    #[rstest]
    #[tokio::test]
    async fn test_single_timestamp_per_write(store: InMemoryPredictionStore) {
        let batch = ValidatedBatch::from_records(sample_records(3));

        BatchWriter::new(store.clone()).write(&batch, size(1)).await.unwrap();

        let rows = store.rows();
        assert!(rows.iter().all(|r| r.created_at == rows[0].created_at && r.updated_at == r.created_at));
    }

    #[rstest]
    #[tokio::test]
    async fn test_empty_batch_does_not_touch_store(store: InMemoryPredictionStore) {
        store.set_unavailable(true);

        let result = BatchWriter::new(store.clone())
            .write(&ValidatedBatch::default(), size(10))
            .await
            .unwrap();

        assert_eq!(result, LoadResult::default());
        assert!(!store.table_ready());
        assert_eq!(store.chunk_attempts(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_unavailable_store_is_fatal(store: InMemoryPredictionStore) {
        store.set_unavailable(true);
        let batch = ValidatedBatch::from_records(sample_records(3));

        let err = BatchWriter::new(store.clone()).write(&batch, size(10)).await.unwrap_err();

        assert!(matches!(err, Error::Unavailable(_)));
        assert!(store.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_table_creation_refused_still_loads(store: InMemoryPredictionStore) {
        store.reject_ensure_table();
        let batch = ValidatedBatch::from_records(sample_records(5));

        let result = BatchWriter::new(store.clone()).write(&batch, size(2)).await.unwrap();

        assert_eq!(result.inserted, 5);
        assert_eq!(result.failed, 0);
        assert_eq!(result.committed_chunks, 3);
        assert!(!store.table_ready());
        assert_eq!(store.len(), 5);
    }

    #[rstest]
    #[tokio::test]
    async fn test_outage_mid_load_aborts_without_fallback(store: InMemoryPredictionStore) {
        store.go_down_after(2);
        let batch = ValidatedBatch::from_records(sample_records(10));

        let err = BatchWriter::new(store.clone()).write(&batch, size(3)).await.unwrap_err();

        assert!(matches!(err, Error::Unavailable(_)));
        assert_eq!(store.len(), 6);
        assert_eq!(store.single_attempts(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_cancelled_before_first_chunk(store: InMemoryPredictionStore) {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let batch = ValidatedBatch::from_records(sample_records(4));

        let err = BatchWriter::new(store.clone())
            .with_cancellation(cancel)
            .write(&batch, size(2))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Interrupted));
        assert!(store.is_empty());
    }

    /// Cancels its token once a chunk has been appended
    struct CancelAfterFirstChunk {
        inner: InMemoryPredictionStore,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl PredictionStore for CancelAfterFirstChunk {
        async fn ensure_table(&self) -> crate::db::errors::Result<()> {
            self.inner.ensure_table().await
        }

        async fn append_chunk(&self, rows: &[PredictionRow]) -> crate::db::errors::Result<u64> {
            let n = self.inner.append_chunk(rows).await?;
            self.cancel.cancel();
            Ok(n)
        }
    }

    #[rstest]
    #[tokio::test]
    async fn test_chunk_in_flight_completes_before_cancel(store: InMemoryPredictionStore) {
        let cancel = CancellationToken::new();
        let wrapped = CancelAfterFirstChunk {
            inner: store.clone(),
            cancel: cancel.clone(),
        };
        let batch = ValidatedBatch::from_records(sample_records(6));

        let err = BatchWriter::new(wrapped)
            .with_cancellation(cancel)
            .write(&batch, size(3))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Interrupted));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_display() {
        let result = LoadResult {
            attempted: 10,
            inserted: 9,
            failed: 1,
            committed_chunks: 2,
            fallback_chunks: 1,
            rejected: vec![],
        };
        assert_eq!(
            result.to_string(),
            "attempted 10, inserted 9, failed 1 (2 chunks committed, 1 retried per record)"
        );
    }

    #[cfg(feature = "postgres-tests")]
    mod postgres {
        use super::*;
        use crate::db::handlers::Predictions;
        use sqlx::PgPool;

        fn predictions(pool: PgPool) -> Predictions {
            Predictions::new(pool, r#""public"."customer_predictions""#.to_string())
        }

        #[sqlx::test(migrations = false)]
        #[test_log::test]
        async fn test_duplicate_in_chunk_postgres(pool: PgPool) {
            run_test_duplicate_in_chunk(predictions(pool.clone())).await;
            assert_eq!(predictions(pool).count().await.unwrap(), 1);
        }

        #[sqlx::test(migrations = false)]
        #[test_log::test]
        async fn test_bad_record_isolated_postgres(pool: PgPool) {
            run_test_bad_record_isolated(predictions(pool.clone())).await;

            let stored = predictions(pool).list().await.unwrap();
            assert_eq!(stored.len(), 9);
            assert!(stored.iter().all(|r| r.customer_id != "C-00004"));
        }
    }
}
