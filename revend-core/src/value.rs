//! Dynamically-typed column values

use crate::{DataAccessError, RevendResult, Timestamp};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A single column value as delivered by a backend.
///
/// Values are totally ordered (variant first, then payload) so key tuples can
/// be sorted by the in-memory backend the same way a database would order a
/// homogeneous column.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuditValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
    Uuid(Uuid),
    Timestamp(Timestamp),
}

impl AuditValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AuditValue::Null)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            AuditValue::Null => "null",
            AuditValue::Bool(_) => "bool",
            AuditValue::Integer(_) => "integer",
            AuditValue::Text(_) => "text",
            AuditValue::Uuid(_) => "uuid",
            AuditValue::Timestamp(_) => "timestamp",
        }
    }

    /// Normalize a revision timestamp to a typed timestamp.
    ///
    /// Revision-info tables store the timestamp either as epoch milliseconds
    /// or as a native timestamp; both map to the same value. `Null` stays
    /// `Null`.
    pub fn normalize_timestamp(self, column: &str) -> RevendResult<AuditValue> {
        match self {
            AuditValue::Null | AuditValue::Timestamp(_) => Ok(self),
            AuditValue::Integer(millis) => Utc
                .timestamp_millis_opt(millis)
                .single()
                .map(AuditValue::Timestamp)
                .ok_or_else(|| {
                    DataAccessError::TypeMismatch {
                        column: column.to_string(),
                        expected: "epoch milliseconds".to_string(),
                        found: millis.to_string(),
                    }
                    .into()
                }),
            other => Err(DataAccessError::TypeMismatch {
                column: column.to_string(),
                expected: "timestamp".to_string(),
                found: other.type_name().to_string(),
            }
            .into()),
        }
    }
}

impl fmt::Display for AuditValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditValue::Null => write!(f, "null"),
            AuditValue::Bool(v) => write!(f, "{}", v),
            AuditValue::Integer(v) => write!(f, "{}", v),
            AuditValue::Text(v) => write!(f, "{}", v),
            AuditValue::Uuid(v) => write!(f, "{}", v),
            AuditValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<i64> for AuditValue {
    fn from(value: i64) -> Self {
        AuditValue::Integer(value)
    }
}

impl From<i32> for AuditValue {
    fn from(value: i32) -> Self {
        AuditValue::Integer(i64::from(value))
    }
}

impl From<bool> for AuditValue {
    fn from(value: bool) -> Self {
        AuditValue::Bool(value)
    }
}

impl From<&str> for AuditValue {
    fn from(value: &str) -> Self {
        AuditValue::Text(value.to_string())
    }
}

impl From<String> for AuditValue {
    fn from(value: String) -> Self {
        AuditValue::Text(value)
    }
}

impl From<Uuid> for AuditValue {
    fn from(value: Uuid) -> Self {
        AuditValue::Uuid(value)
    }
}

impl From<Timestamp> for AuditValue {
    fn from(value: Timestamp) -> Self {
        AuditValue::Timestamp(value)
    }
}

impl<T: Into<AuditValue>> From<Option<T>> for AuditValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AuditValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RevendError;

    #[test]
    fn test_epoch_millis_and_typed_timestamp_normalize_equal() {
        let typed = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let from_millis = AuditValue::Integer(1_700_000_000_123)
            .normalize_timestamp("revTstamp")
            .unwrap();
        let from_typed = AuditValue::Timestamp(typed)
            .normalize_timestamp("revTstamp")
            .unwrap();
        assert_eq!(from_millis, from_typed);
        assert_eq!(from_millis, AuditValue::Timestamp(typed));
    }

    #[test]
    fn test_null_timestamp_stays_null() {
        let v = AuditValue::Null.normalize_timestamp("revTstamp").unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn test_text_timestamp_is_type_mismatch() {
        let err = AuditValue::from("yesterday")
            .normalize_timestamp("revTstamp")
            .unwrap_err();
        assert!(matches!(
            err,
            RevendError::DataAccess(DataAccessError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_integer_ordering_within_variant() {
        let mut values = vec![
            AuditValue::Integer(9),
            AuditValue::Integer(-3),
            AuditValue::Integer(5),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                AuditValue::Integer(-3),
                AuditValue::Integer(5),
                AuditValue::Integer(9)
            ]
        );
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(AuditValue::from(None::<i64>), AuditValue::Null);
        assert_eq!(AuditValue::from(Some(4i64)), AuditValue::Integer(4));
    }
}
