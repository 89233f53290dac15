//! Decimal helpers shared by every money-carrying type.

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::errors::DeserializationError;

pub type FVal = Decimal;
pub type Timestamp = i64;

pub const ZERO: FVal = Decimal::ZERO;
pub const ONE: FVal = Decimal::ONE;

/// Default tolerance used when comparing computed amounts: 1e-6.
pub fn default_max_diff() -> FVal {
    Decimal::new(1, 6)
}

pub fn is_close(a: FVal, b: FVal, max_diff: FVal) -> bool {
    (a - b).abs() <= max_diff
}

/// Parse a decimal from text, accepting scientific notation ("1e-5").
pub fn fval_from_str(s: &str) -> Result<FVal, DeserializationError> {
    let trimmed = s.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| DeserializationError::new(format!("failed to parse \"{trimmed}\" as a decimal: {e}")))
}

/// Coerce a JSON scalar into a decimal. Strings and numbers are accepted.
/// Floats go through their shortest textual form so no binary noise leaks in.
pub fn fval_from_json(value: &Value) -> Result<FVal, DeserializationError> {
    match value {
        Value::String(s) => fval_from_str(s),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Decimal::from(u))
            } else {
                fval_from_str(&n.to_string())
            }
        }
        other => Err(DeserializationError::new(format!(
            "expected a numeric value, got {other}"
        ))),
    }
}

pub fn ts_now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Formats a unix timestamp the way reports show dates.
pub fn timestamp_to_date(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|d| d.format("%d/%m/%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
