//! Schema validation and row cleaning.
//!
//! [`validate`] turns a [`RawTable`] into a [`ValidatedBatch`]: every required column must be
//! present, every field is coerced explicitly (see [`coerce`]), and rows with any null after
//! coercion are dropped and recorded in the [`ValidationReport`]. Probabilities outside [0, 1]
//! are counted but kept.

pub mod coerce;

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, instrument, warn};

use crate::db::models::predictions::PredictionRecord;
use crate::errors::{Error, Result};
use crate::input::{RawRow, RawTable};
use coerce::{Coerced, NullReason, to_integer, to_numeric, to_text};

/// Columns the input must contain, in the order they are reported when missing
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "CustomerID",
    "LR_Prediction",
    "LR_Probability",
    "Actual_Churn",
    "Risk_Category",
    "XGB_Prediction",
    "XGB_Probability",
    "XGB_Risk_Category",
];

/// Why one field of a dropped row was null
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub column: &'static str,
    pub reason: NullReason,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.column, self.reason)
    }
}

/// A row removed during validation
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRow {
    /// 1-based position among the data rows
    pub row: usize,
    pub customer_id: Option<String>,
    pub issues: Vec<FieldIssue>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub input_rows: usize,
    pub dropped: Vec<DroppedRow>,
    /// Retained rows with a probability outside [0, 1]
    pub out_of_range: usize,
    pub risk_distribution: BTreeMap<String, usize>,
    pub xgb_risk_distribution: BTreeMap<String, usize>,
}

impl ValidationReport {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

/// Records that passed validation, in input order, with the report describing what was removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedBatch {
    records: Vec<PredictionRecord>,
    report: ValidationReport,
}

impl ValidatedBatch {
    /// Batch of already-typed records, nothing dropped
    pub fn from_records(records: Vec<PredictionRecord>) -> Self {
        let report = summarize(&records, records.len(), Vec::new());
        Self { records, report }
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_parts(self) -> (Vec<PredictionRecord>, ValidationReport) {
        (self.records, self.report)
    }
}

/// Header positions of the required columns
struct Columns([usize; REQUIRED_COLUMNS.len()]);

impl Columns {
    fn resolve(table: &RawTable) -> Result<Self> {
        let mut positions = [0; REQUIRED_COLUMNS.len()];
        let mut missing = Vec::new();

        for (slot, name) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
            match table.column_index(name) {
                Some(index) => *slot = index,
                None => missing.push(name.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(Self(positions))
        } else {
            Err(Error::SchemaMismatch { missing })
        }
    }

    fn field<'a>(&self, row: &'a RawRow, column: usize) -> Option<&'a str> {
        row.get(self.0[column])
    }
}

/// Collects null reasons while a row is being coerced
struct RowCoercion<'a> {
    columns: &'a Columns,
    row: &'a RawRow,
    issues: Vec<FieldIssue>,
}

impl RowCoercion<'_> {
    fn take<T>(&mut self, column: usize, coerce: fn(Option<&str>) -> Coerced<T>) -> Option<T> {
        match coerce(self.columns.field(self.row, column)) {
            Coerced::Value(v) => Some(v),
            Coerced::Null(reason) => {
                self.issues.push(FieldIssue {
                    column: REQUIRED_COLUMNS[column],
                    reason,
                });
                None
            }
        }
    }
}

fn coerce_row(columns: &Columns, row: &RawRow) -> std::result::Result<PredictionRecord, Vec<FieldIssue>> {
    let mut c = RowCoercion {
        columns,
        row,
        issues: Vec::new(),
    };

    // Every field is coerced so a dropped row reports all of its problems, not only the first
    let customer_id = c.take(0, to_text);
    let lr_prediction = c.take(1, to_integer);
    let lr_probability = c.take(2, to_numeric);
    let actual_churn = c.take(3, to_integer);
    let risk_category = c.take(4, to_text);
    let xgb_prediction = c.take(5, to_integer);
    let xgb_probability = c.take(6, to_numeric);
    let xgb_risk_category = c.take(7, to_text);

    match (
        customer_id,
        lr_prediction,
        lr_probability,
        actual_churn,
        risk_category,
        xgb_prediction,
        xgb_probability,
        xgb_risk_category,
    ) {
        (
            Some(customer_id),
            Some(lr_prediction),
            Some(lr_probability),
            Some(actual_churn),
            Some(risk_category),
            Some(xgb_prediction),
            Some(xgb_probability),
            Some(xgb_risk_category),
        ) => Ok(PredictionRecord {
            customer_id,
            lr_prediction,
            lr_probability,
            actual_churn,
            risk_category,
            xgb_prediction,
            xgb_probability,
            xgb_risk_category,
        }),
        _ => Err(c.issues),
    }
}

fn summarize(records: &[PredictionRecord], input_rows: usize, dropped: Vec<DroppedRow>) -> ValidationReport {
    let mut report = ValidationReport {
        input_rows,
        dropped,
        ..Default::default()
    };

    for record in records {
        if !record.probabilities_in_range() {
            report.out_of_range += 1;
        }
        *report.risk_distribution.entry(record.risk_category.clone()).or_default() += 1;
        *report.xgb_risk_distribution.entry(record.xgb_risk_category.clone()).or_default() += 1;
    }

    report
}

/// Distribution as `value=count` pairs, most frequent first
pub fn ranked(distribution: &BTreeMap<String, usize>) -> String {
    let mut entries: Vec<_> = distribution.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    entries.iter().map(|(value, count)| format!("{value}={count}")).collect::<Vec<_>>().join(", ")
}

/// Check the header, coerce every row, and drop rows with missing or invalid fields.
///
/// # Errors
/// [`Error::SchemaMismatch`] if any required column is absent; nothing is processed in that case.
#[instrument(skip_all, fields(rows = table.len()))]
pub fn validate(table: &RawTable) -> Result<ValidatedBatch> {
    let columns = Columns::resolve(table)?;

    let mut records = Vec::with_capacity(table.len());
    let mut dropped = Vec::new();

    for (index, row) in table.rows().iter().enumerate() {
        match coerce_row(&columns, row) {
            Ok(record) => records.push(record),
            Err(issues) => dropped.push(DroppedRow {
                row: index + 1,
                customer_id: to_text(columns.field(row, 0)).value(),
                issues,
            }),
        }
    }

    let report = summarize(&records, table.len(), dropped);

    if report.dropped_count() > 0 {
        warn!(
            dropped = report.dropped_count(),
            remaining = records.len(),
            "Removed rows with missing values"
        );
    }
    if report.out_of_range > 0 {
        warn!(count = report.out_of_range, "Found rows with probability values outside [0, 1]");
    }
    info!(risk_category = %ranked(&report.risk_distribution), "Risk category distribution");
    info!(xgb_risk_category = %ranked(&report.xgb_risk_distribution), "XGB risk category distribution");
    info!(records = records.len(), "Data validation completed");

    Ok(ValidatedBatch { records, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{csv_line, csv_with, table_from};

    #[test]
    fn test_missing_customer_id_is_dropped() {
        let text = csv_with(&[
            csv_line("C-1"),
            csv_line("C-2"),
            ",0,0.10,0,Low,0,0.12,Low".to_string(),
            csv_line("C-3"),
        ]);

        let batch = validate(&table_from(&text)).unwrap();

        assert_eq!(batch.len(), 3);
        let report = batch.report();
        assert_eq!(report.input_rows, 4);
        assert_eq!(report.dropped_count(), 1);
        assert_eq!(report.dropped[0].row, 3);
        assert_eq!(report.dropped[0].customer_id, None);
        assert_eq!(
            report.dropped[0].issues,
            vec![FieldIssue {
                column: "CustomerID",
                reason: NullReason::Missing
            }]
        );
    }

    #[test]
    fn test_missing_columns_listed_in_order() {
        let text = "CustomerID,LR_Prediction,LR_Probability,Risk_Category,XGB_Prediction,XGB_Probability\nC-1,1,0.5,High,1,0.5\n";

        let err = validate(&table_from(text)).unwrap_err();

        match err {
            Error::SchemaMismatch { missing } => assert_eq!(missing, vec!["Actual_Churn", "XGB_Risk_Category"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_probability_drops_one_row() {
        let mut lines: Vec<String> = (0..1000).map(|i| csv_line(&format!("C-{i}"))).collect();
        lines[500] = "C-500,1,high,1,High,0,0.31,Low".to_string();

        let batch = validate(&table_from(&csv_with(&lines))).unwrap();

        assert_eq!(batch.len(), 999);
        let dropped = &batch.report().dropped[0];
        assert_eq!(dropped.row, 501);
        assert_eq!(dropped.customer_id.as_deref(), Some("C-500"));
        assert_eq!(
            dropped.issues[0].reason,
            NullReason::Invalid { raw: "high".to_string() }
        );
    }

    #[test]
    fn test_out_of_range_probabilities_are_kept() {
        let text = csv_with(&[
            "C-1,1,1.2,1,High,1,0.9,High".to_string(),
            "C-2,0,0.1,0,Low,0,-0.05,Low".to_string(),
            csv_line("C-3"),
        ]);

        let batch = validate(&table_from(&text)).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.report().out_of_range, 2);
        assert_eq!(batch.report().dropped_count(), 0);
    }

    #[test]
    fn test_every_issue_reported() {
        let text = csv_with(&["C-1,0.5,NA,1,,1,0.9,High".to_string()]);

        let batch = validate(&table_from(&text)).unwrap();

        assert!(batch.is_empty());
        let columns: Vec<_> = batch.report().dropped[0].issues.iter().map(|i| i.column).collect();
        assert_eq!(columns, vec!["LR_Prediction", "LR_Probability", "Risk_Category"]);
    }

    #[test]
    fn test_integral_decimals_and_extra_columns() {
        let text = "Extra,CustomerID,LR_Prediction,LR_Probability,Actual_Churn,Risk_Category,XGB_Prediction,XGB_Probability,XGB_Risk_Category\n\
                    x,C-1,1.0,0.7,0.0,Medium,1,0.6,Medium\n";

        let batch = validate(&table_from(text)).unwrap();

        let record = &batch.records()[0];
        assert_eq!(record.customer_id, "C-1");
        assert_eq!(record.lr_prediction, 1);
        assert_eq!(record.actual_churn, 0);
    }

    #[test]
    fn test_short_row_is_dropped() {
        let text = csv_with(&["C-1,1,0.8,1,High".to_string(), csv_line("C-2")]);

        let batch = validate(&table_from(&text)).unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.report().dropped[0].issues.len(), 3);
    }

    #[test]
    fn test_empty_input_is_empty_batch() {
        let batch = validate(&table_from(&csv_with::<&str>(&[]))).unwrap();

        assert!(batch.is_empty());
        assert_eq!(batch.report().input_rows, 0);
    }

    #[test]
    fn test_risk_distributions() {
        let text = csv_with(&[
            "C-1,1,0.9,1,High,1,0.9,High".to_string(),
            "C-2,0,0.2,0,Low,1,0.6,Medium".to_string(),
            "C-3,1,0.8,1,High,0,0.2,Low".to_string(),
        ]);

        let batch = validate(&table_from(&text)).unwrap();
        let report = batch.report();

        assert_eq!(report.risk_distribution.get("High"), Some(&2));
        assert_eq!(report.risk_distribution.get("Low"), Some(&1));
        assert_eq!(report.xgb_risk_distribution.len(), 3);
        assert_eq!(ranked(&report.risk_distribution), "High=2, Low=1");
    }

    #[test]
    fn test_from_records_has_no_drops() {
        let batch = ValidatedBatch::from_records(crate::test_utils::sample_records(3));
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.report().input_rows, 3);
        assert!(batch.report().dropped.is_empty());
    }
}
