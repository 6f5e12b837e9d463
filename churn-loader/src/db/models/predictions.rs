use chrono::{DateTime, Utc};

/// One prediction row that passed validation.
///
/// Labels are kept as `i32` as read; the table's check constraints decide whether they are valid
/// binary labels.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub customer_id: String,
    pub lr_prediction: i32,
    pub lr_probability: f64,
    pub actual_churn: i32,
    pub risk_category: String,
    pub xgb_prediction: i32,
    pub xgb_probability: f64,
    pub xgb_risk_category: String,
}

impl PredictionRecord {
    /// Whether both probabilities lie in [0, 1]
    pub fn probabilities_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.lr_probability) && (0.0..=1.0).contains(&self.xgb_probability)
    }

    /// Attach write-time timestamps
    pub fn stamp(&self, at: DateTime<Utc>) -> PredictionRow {
        PredictionRow {
            record: self.clone(),
            created_at: at,
            updated_at: at,
        }
    }
}

/// A record ready for insertion, carrying the system timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub record: PredictionRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row as persisted in the predictions table
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredPrediction {
    pub customer_id: String,
    pub lr_prediction: i32,
    pub lr_probability: f64,
    pub actual_churn: i32,
    pub risk_category: String,
    pub xgb_prediction: i32,
    pub xgb_probability: f64,
    pub xgb_risk_category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PredictionRow> for StoredPrediction {
    fn from(row: PredictionRow) -> Self {
        let PredictionRow {
            record,
            created_at,
            updated_at,
        } = row;
        Self {
            customer_id: record.customer_id,
            lr_prediction: record.lr_prediction,
            lr_probability: record.lr_probability,
            actual_churn: record.actual_churn,
            risk_category: record.risk_category,
            xgb_prediction: record.xgb_prediction,
            xgb_probability: record.xgb_probability,
            xgb_risk_category: record.xgb_risk_category,
            created_at,
            updated_at,
        }
    }
}
