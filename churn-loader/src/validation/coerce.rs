//! Explicit, tagged type coercion.
//!
//! Each coercion returns [`Coerced::Value`] or [`Coerced::Null`] with the reason, never an error:
//! a value that cannot be coerced makes its row droppable, it does not stop the load.

use std::fmt;

/// Tokens read as "no value", in addition to the empty string
const NA_TOKENS: &[&str] = &["NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "null", "NULL", "None", "<NA>", "#N/A"];

/// Why a field coerced to null
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NullReason {
    /// Absent, empty, or an NA token
    Missing,
    /// Present but not of the expected type
    Invalid { raw: String },
}

impl fmt::Display for NullReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NullReason::Missing => write!(f, "missing"),
            NullReason::Invalid { raw } => write!(f, "invalid value '{raw}'"),
        }
    }
}

/// Result of coercing one field
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced<T> {
    Value(T),
    Null(NullReason),
}

impl<T> Coerced<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Coerced::Value(v) => Some(v),
            Coerced::Null(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Coerced::Null(_))
    }
}

pub fn is_na(raw: &str) -> bool {
    raw.is_empty() || NA_TOKENS.contains(&raw)
}

/// Non-null text
pub fn to_text(raw: Option<&str>) -> Coerced<String> {
    match raw {
        Some(s) if !is_na(s) => Coerced::Value(s.to_string()),
        _ => Coerced::Null(NullReason::Missing),
    }
}

/// Integer, accepting integral decimals such as `1.0`
pub fn to_integer(raw: Option<&str>) -> Coerced<i32> {
    let Some(s) = raw.filter(|s| !is_na(s)) else {
        return Coerced::Null(NullReason::Missing);
    };

    if let Ok(v) = s.parse::<i32>() {
        return Coerced::Value(v);
    }

    match s.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f >= f64::from(i32::MIN) && f <= f64::from(i32::MAX) => Coerced::Value(f as i32),
        _ => Coerced::Null(NullReason::Invalid { raw: s.to_string() }),
    }
}

/// Real number; non-numeric text is null, not an error
pub fn to_numeric(raw: Option<&str>) -> Coerced<f64> {
    let Some(s) = raw.filter(|s| !is_na(s)) else {
        return Coerced::Null(NullReason::Missing);
    };

    match s.parse::<f64>() {
        Ok(f) if !f.is_nan() => Coerced::Value(f),
        _ => Coerced::Null(NullReason::Invalid { raw: s.to_string() }),
    }
}
