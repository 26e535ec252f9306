//! Status history stored inline on the order row as a JSON object of
//! `status -> "YYYY-MM-DD HH:MM:SS"`, kept in insertion order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::ServiceError;
use crate::models::OrderStatus;

pub const HISTORY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub status: String,
    pub at: String,
}

fn parse_map(raw: &str) -> Result<Map<String, Value>, ServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(ServiceError::HistoryCorrupted(format!(
            "expected a JSON object, found {}",
            other
        ))),
        Err(e) => Err(ServiceError::HistoryCorrupted(e.to_string())),
    }
}

/// Parses a stored history. Blank, `null` and `{}` are all the empty history.
pub fn parse_history(raw: &str) -> Result<Vec<HistoryEntry>, ServiceError> {
    parse_map(raw)?
        .into_iter()
        .map(|(status, at)| match at {
            Value::String(at) => Ok(HistoryEntry { status, at }),
            other => Err(ServiceError::HistoryCorrupted(format!(
                "timestamp for {} is not a string: {}",
                status, other
            ))),
        })
        .collect()
}

/// Returns `existing` with `status -> at` appended, re-serialized.
pub fn append_to_history(
    existing: &str,
    status: OrderStatus,
    at: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let mut map = parse_map(existing)?;
    map.insert(
        status.to_string(),
        Value::String(at.format(HISTORY_TIMESTAMP_FORMAT).to_string()),
    );
    serde_json::to_string(&map).map_err(|e| ServiceError::SerializationError(e.to_string()))
}

/// History of a freshly created order.
pub fn seed_history(at: DateTime<Utc>) -> Result<String, ServiceError> {
    append_to_history("", OrderStatus::Pending, at)
}
