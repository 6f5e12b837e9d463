//! Shared test fixtures.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::db::models::predictions::PredictionRecord;
use crate::input::RawTable;

pub const HEADER: &str =
    "CustomerID,LR_Prediction,LR_Probability,Actual_Churn,Risk_Category,XGB_Prediction,XGB_Probability,XGB_Risk_Category";

pub fn sample_record(customer_id: &str) -> PredictionRecord {
    PredictionRecord {
        customer_id: customer_id.to_string(),
        lr_prediction: 1,
        lr_probability: 0.82,
        actual_churn: 1,
        risk_category: "High".to_string(),
        xgb_prediction: 1,
        xgb_probability: 0.91,
        xgb_risk_category: "High".to_string(),
    }
}

pub fn sample_records(count: usize) -> Vec<PredictionRecord> {
    (0..count).map(|i| sample_record(&format!("C-{i:05}"))).collect()
}

/// A valid CSV line for `customer_id`
pub fn csv_line(customer_id: &str) -> String {
    format!("{customer_id},1,0.82,1,High,0,0.31,Low")
}

/// CSV text with the standard header followed by `lines`
pub fn csv_with<S: AsRef<str>>(lines: &[S]) -> String {
    let mut text = String::from(HEADER);
    text.push('\n');
    for line in lines {
        text.push_str(line.as_ref());
        text.push('\n');
    }
    text
}

pub fn table_from(text: &str) -> RawTable {
    RawTable::from_reader(text.as_bytes(), b',').unwrap()
}

pub fn write_csv(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
