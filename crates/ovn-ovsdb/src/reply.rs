//! `transact` reply validation

use serde::Deserialize;
use serde_json::Value;

use crate::cache::Row;
use crate::datum;
use crate::error::{OvsdbError, Result};

/// Result of a single operation inside a `transact` reply
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OperationResult {
    #[serde(default)]
    pub rows: Option<Vec<Row>>,
    #[serde(default)]
    pub uuid: Option<Value>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl OperationResult {
    /// Rows returned by a `select` (empty for other operations)
    pub fn rows(&self) -> &[Row] {
        self.rows.as_deref().unwrap_or(&[])
    }

    /// `_uuid` of the first selected row
    pub fn first_uuid(&self) -> Option<&str> {
        self.rows().first()?.get("_uuid").and_then(datum::as_uuid)
    }

    /// Rows touched by a `mutate`/`update`/`delete`
    pub fn count(&self) -> u64 {
        self.count.unwrap_or(0)
    }
}

/// Validate a raw `transact` result against the number of submitted operations.
///
/// The server answers with one element per operation. Once an operation
/// fails the remaining elements are `null`, and a commit failure is
/// reported as an extra element past the last operation. Any error fails
/// the whole batch.
pub fn check_results(expected: usize, result: Value) -> Result<Vec<OperationResult>> {
    let raw: Vec<Option<OperationResult>> = serde_json::from_value(result)?;

    if raw.len() < expected {
        return Err(OvsdbError::ReplyCount {
            expected,
            received: raw.len(),
        });
    }

    for (index, op) in raw.iter().enumerate() {
        if let Some(OperationResult {
            error: Some(error),
            details,
            ..
        }) = op
        {
            return Err(OvsdbError::OperationFailed {
                index,
                error: error.clone(),
                details: details.clone().unwrap_or_default(),
            });
        }
    }

    Ok(raw
        .into_iter()
        .take(expected)
        .map(Option::unwrap_or_default)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_successful_reply() {
        let results = check_results(
            2,
            json!([{"uuid": ["uuid", "u1"]}, {"count": 1}]),
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].count(), 1);
    }

    #[test]
    fn test_short_reply_is_an_error() {
        let err = check_results(3, json!([{}, {}])).unwrap_err();
        assert!(matches!(
            err,
            OvsdbError::ReplyCount {
                expected: 3,
                received: 2
            }
        ));
    }

    #[test]
    fn test_operation_error_fails_whole_batch() {
        let err = check_results(
            2,
            json!([{"uuid": ["uuid", "u1"]}, {"error": "constraint violation", "details": "no row"}]),
        )
        .unwrap_err();
        assert!(matches!(err, OvsdbError::OperationFailed { index: 1, .. }));
    }

    #[test]
    fn test_commit_error_after_last_operation() {
        let err = check_results(
            1,
            json!([{"uuid": ["uuid", "u1"]}, {"error": "referential integrity violation"}]),
        )
        .unwrap_err();
        assert!(matches!(err, OvsdbError::OperationFailed { index: 1, .. }));
    }

    #[test]
    fn test_first_uuid_from_select() {
        let results = check_results(
            1,
            json!([{"rows": [{"_uuid": ["uuid", "9a1e"], "name": "p1"}]}]),
        )
        .unwrap();
        assert_eq!(results[0].first_uuid(), Some("9a1e"));
        assert_eq!(results[0].rows().len(), 1);
    }
}
