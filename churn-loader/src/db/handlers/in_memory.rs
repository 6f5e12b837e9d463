//! In-memory store implementation.
//!
//! Enforces the same constraints as the PostgreSQL table (unique customer id, binary labels,
//! non-empty text columns) with all-or-nothing chunks, and can be told to reject specific keys or
//! to become unreachable. Used to exercise the writer and the loader without a database.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use super::PredictionStore;
use crate::db::errors::{Result, StoreError};
use crate::db::models::predictions::{PredictionRow, StoredPrediction};

const TABLE: &str = "customer_predictions";

#[derive(Default)]
struct State {
    rows: Vec<StoredPrediction>,
    keys: HashSet<String>,
    table_ready: bool,
    /// Refuse table creation as a role without CREATE privilege would
    reject_ensure_table: bool,
    /// Keys rejected as if by a trigger or a constraint we do not model
    rejected_keys: HashSet<String>,
    /// Remaining successful chunk appends before the store goes down
    chunks_before_outage: Option<usize>,
    unavailable: bool,
    chunk_attempts: usize,
    single_attempts: usize,
}

/// In-memory implementation of [`PredictionStore`].
///
/// Clones share state, so a test can keep a handle while the writer owns another.
#[derive(Clone, Default)]
pub struct InMemoryPredictionStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with rows from an earlier load
    pub fn with_rows(rows: impl IntoIterator<Item = PredictionRow>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write();
            for row in rows {
                state.keys.insert(row.record.customer_id.clone());
                state.rows.push(row.into());
            }
        }
        store
    }

    /// Reject any append that contains `customer_id`
    pub fn reject_key(&self, customer_id: impl Into<String>) {
        self.state.write().rejected_keys.insert(customer_id.into());
    }

    /// Refuse table creation with a non-fatal permission error. Appends still work.
    pub fn reject_ensure_table(&self) {
        self.state.write().reject_ensure_table = true;
    }

    /// Make every subsequent operation fail as unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    /// Accept `chunks` more chunk appends, then behave as a lost connection
    pub fn go_down_after(&self, chunks: usize) {
        self.state.write().chunks_before_outage = Some(chunks);
    }

    pub fn rows(&self) -> Vec<StoredPrediction> {
        self.state.read().rows.clone()
    }

    pub fn customer_ids(&self) -> Vec<String> {
        self.state.read().rows.iter().map(|r| r.customer_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn table_ready(&self) -> bool {
        self.state.read().table_ready
    }

    /// Number of multi-row appends attempted (including single-row chunks)
    pub fn chunk_attempts(&self) -> usize {
        self.state.read().chunk_attempts
    }

    /// Number of per-record appends attempted
    pub fn single_attempts(&self) -> usize {
        self.state.read().single_attempts
    }
}

fn unavailable() -> StoreError {
    StoreError::Unavailable(anyhow::anyhow!("connection to in-memory store lost"))
}

/// Check one row against the table's constraints, given the keys already taken.
fn check_row(state: &State, taken: &HashSet<&str>, row: &PredictionRow) -> Result<()> {
    let record = &row.record;

    if state.rejected_keys.contains(&record.customer_id) {
        return Err(StoreError::Rejected {
            code: Some("22000".to_string()),
            message: format!("row for customer {} rejected", record.customer_id),
        });
    }

    if record.customer_id.is_empty() || record.risk_category.is_empty() || record.xgb_risk_category.is_empty() {
        return Err(StoreError::NotNullViolation {
            table: Some(TABLE.to_string()),
            message: "null value violates not-null constraint".to_string(),
        });
    }

    if state.keys.contains(&record.customer_id) || taken.contains(record.customer_id.as_str()) {
        return Err(StoreError::UniqueViolation {
            constraint: Some(format!("{TABLE}_pkey")),
            table: Some(TABLE.to_string()),
            message: format!("duplicate key value violates unique constraint: customer_id={}", record.customer_id),
        });
    }

    for (column, value) in [
        ("lr_prediction", record.lr_prediction),
        ("actual_churn", record.actual_churn),
        ("xgb_prediction", record.xgb_prediction),
    ] {
        if value != 0 && value != 1 {
            return Err(StoreError::CheckViolation {
                constraint: Some(format!("{TABLE}_{column}_check")),
                table: Some(TABLE.to_string()),
                message: format!("new row violates check constraint on {column}: {value}"),
            });
        }
    }

    Ok(())
}

#[async_trait::async_trait]
impl PredictionStore for InMemoryPredictionStore {
    async fn ensure_table(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.unavailable {
            return Err(unavailable());
        }
        if state.reject_ensure_table {
            return Err(StoreError::Rejected {
                code: Some("42501".to_string()),
                message: "permission denied for schema public".to_string(),
            });
        }
        state.table_ready = true;
        Ok(())
    }

    async fn append_chunk(&self, rows: &[PredictionRow]) -> Result<u64> {
        let mut state = self.state.write();
        state.chunk_attempts += 1;

        if let Some(remaining) = state.chunks_before_outage {
            if remaining == 0 {
                state.unavailable = true;
            } else {
                state.chunks_before_outage = Some(remaining - 1);
            }
        }
        if state.unavailable {
            return Err(unavailable());
        }

        // Validate everything before touching the rows: the chunk is all-or-nothing
        let mut taken: HashSet<&str> = HashSet::with_capacity(rows.len());
        for row in rows {
            check_row(&state, &taken, row)?;
            taken.insert(row.record.customer_id.as_str());
        }

        for row in rows {
            state.keys.insert(row.record.customer_id.clone());
            state.rows.push(row.clone().into());
        }

        Ok(rows.len() as u64)
    }

    async fn append_one(&self, row: &PredictionRow) -> Result<()> {
        let mut state = self.state.write();
        state.single_attempts += 1;

        if state.unavailable {
            return Err(unavailable());
        }

        check_row(&state, &HashSet::new(), row)?;
        state.keys.insert(row.record.customer_id.clone());
        state.rows.push(row.clone().into());
        Ok(())
    }
}
