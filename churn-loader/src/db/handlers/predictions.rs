//! PostgreSQL store for the predictions table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument, trace};

use super::PredictionStore;
use crate::db::errors::Result;
use crate::db::models::predictions::{PredictionRow, StoredPrediction};

/// Repository for the predictions table.
///
/// Chunks are written with a single `INSERT ... SELECT * FROM UNNEST(...)` inside a transaction,
/// so the statement has ten bind parameters whatever the chunk size.
#[derive(Clone, Debug)]
pub struct Predictions {
    pool: PgPool,
    /// Quoted `"schema"."table"`
    table: String,
}

impl Predictions {
    pub fn new(pool: PgPool, qualified_table: impl Into<String>) -> Self {
        Self {
            pool,
            table: qualified_table.into(),
        }
    }

    /// All stored rows ordered by customer id
    pub async fn list(&self) -> Result<Vec<StoredPrediction>> {
        let rows = sqlx::query_as::<_, StoredPrediction>(&format!(
            "SELECT customer_id, lr_prediction, lr_probability, actual_churn, risk_category,
                    xgb_prediction, xgb_probability, xgb_risk_category, created_at, updated_at
             FROM {} ORDER BY customer_id",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl PredictionStore for Predictions {
    #[instrument(skip(self), fields(table = %self.table), err)]
    async fn ensure_table(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                customer_id TEXT PRIMARY KEY,
                lr_prediction INTEGER NOT NULL CHECK (lr_prediction IN (0, 1)),
                lr_probability DOUBLE PRECISION NOT NULL,
                actual_churn INTEGER NOT NULL CHECK (actual_churn IN (0, 1)),
                risk_category TEXT NOT NULL,
                xgb_prediction INTEGER NOT NULL CHECK (xgb_prediction IN (0, 1)),
                xgb_probability DOUBLE PRECISION NOT NULL,
                xgb_risk_category TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;

        debug!("Output table ready");
        Ok(())
    }

    async fn append_chunk(&self, rows: &[PredictionRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Build arrays for UNNEST
        let mut customer_ids: Vec<String> = Vec::with_capacity(rows.len());
        let mut lr_predictions: Vec<i32> = Vec::with_capacity(rows.len());
        let mut lr_probabilities: Vec<f64> = Vec::with_capacity(rows.len());
        let mut actual_churns: Vec<i32> = Vec::with_capacity(rows.len());
        let mut risk_categories: Vec<String> = Vec::with_capacity(rows.len());
        let mut xgb_predictions: Vec<i32> = Vec::with_capacity(rows.len());
        let mut xgb_probabilities: Vec<f64> = Vec::with_capacity(rows.len());
        let mut xgb_risk_categories: Vec<String> = Vec::with_capacity(rows.len());
        let mut created_ats: Vec<DateTime<Utc>> = Vec::with_capacity(rows.len());
        let mut updated_ats: Vec<DateTime<Utc>> = Vec::with_capacity(rows.len());

        for row in rows {
            let record = &row.record;
            customer_ids.push(record.customer_id.clone());
            lr_predictions.push(record.lr_prediction);
            lr_probabilities.push(record.lr_probability);
            actual_churns.push(record.actual_churn);
            risk_categories.push(record.risk_category.clone());
            xgb_predictions.push(record.xgb_prediction);
            xgb_probabilities.push(record.xgb_probability);
            xgb_risk_categories.push(record.xgb_risk_category.clone());
            created_ats.push(row.created_at);
            updated_ats.push(row.updated_at);
        }

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                customer_id, lr_prediction, lr_probability, actual_churn, risk_category,
                xgb_prediction, xgb_probability, xgb_risk_category, created_at, updated_at
            )
            SELECT * FROM UNNEST(
                $1::text[], $2::int[], $3::float8[], $4::int[], $5::text[],
                $6::int[], $7::float8[], $8::text[], $9::timestamptz[], $10::timestamptz[]
            )
            "#,
            self.table
        ))
        .bind(customer_ids)
        .bind(lr_predictions)
        .bind(lr_probabilities)
        .bind(actual_churns)
        .bind(risk_categories)
        .bind(xgb_predictions)
        .bind(xgb_probabilities)
        .bind(xgb_risk_categories)
        .bind(created_ats)
        .bind(updated_ats)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        trace!(count = result.rows_affected(), "Chunk appended");
        Ok(result.rows_affected())
    }

    async fn append_one(&self, row: &PredictionRow) -> Result<()> {
        let record = &row.record;
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                customer_id, lr_prediction, lr_probability, actual_churn, risk_category,
                xgb_prediction, xgb_probability, xgb_risk_category, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
            self.table
        ))
        .bind(&record.customer_id)
        .bind(record.lr_prediction)
        .bind(record.lr_probability)
        .bind(record.actual_churn)
        .bind(&record.risk_category)
        .bind(record.xgb_prediction)
        .bind(record.xgb_probability)
        .bind(&record.xgb_risk_category)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
