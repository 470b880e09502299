//! Value conversion between [`AuditValue`] and PostgreSQL.
//!
//! Audit values are loosely typed (every integer is an `i64`), while a
//! prepared statement knows the exact type of every parameter. Binding picks
//! the Rust type matching the column, narrowing integers and choosing
//! between `timestamp` and `timestamptz`.

use chrono::{DateTime, NaiveDateTime, Utc};
use revend_core::{AuditValue, DataAccessError, RevendError, RevendResult};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;
use uuid::Uuid;

// ============================================================================
// BINDING
// ============================================================================

/// A parameter value typed for its target column.
#[derive(Debug, Clone, PartialEq)]
pub enum PgParam {
    SmallInt(Option<i16>),
    Int(Option<i32>),
    Long(Option<i64>),
    Bool(Option<bool>),
    Text(Option<String>),
    Uuid(Option<Uuid>),
    Timestamp(Option<NaiveDateTime>),
    TimestampTz(Option<DateTime<Utc>>),
}

impl PgParam {
    /// Convert a value for a parameter of type `ty`.
    pub fn bind(value: &AuditValue, ty: &Type, column: &str) -> RevendResult<Self> {
        let param = match *ty {
            Type::INT2 => PgParam::SmallInt(narrow(integer(value, ty, column)?, ty, column)?),
            Type::INT4 => PgParam::Int(narrow(integer(value, ty, column)?, ty, column)?),
            Type::INT8 => PgParam::Long(integer(value, ty, column)?),
            Type::BOOL => PgParam::Bool(match value {
                AuditValue::Null => None,
                AuditValue::Bool(v) => Some(*v),
                other => return Err(mismatch(column, ty, other)),
            }),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => PgParam::Text(match value {
                AuditValue::Null => None,
                AuditValue::Text(v) => Some(v.clone()),
                other => return Err(mismatch(column, ty, other)),
            }),
            Type::UUID => PgParam::Uuid(match value {
                AuditValue::Null => None,
                AuditValue::Uuid(v) => Some(*v),
                other => return Err(mismatch(column, ty, other)),
            }),
            Type::TIMESTAMP => {
                PgParam::Timestamp(timestamp(value, column)?.map(|ts| ts.naive_utc()))
            }
            Type::TIMESTAMPTZ => PgParam::TimestampTz(timestamp(value, column)?),
            _ => {
                return Err(DataAccessError::TypeMismatch {
                    column: column.to_string(),
                    expected: "a supported column type".to_string(),
                    found: ty.name().to_string(),
                }
                .into())
            }
        };
        Ok(param)
    }

    /// Reference usable as a `tokio_postgres` parameter.
    pub fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            PgParam::SmallInt(v) => v,
            PgParam::Int(v) => v,
            PgParam::Long(v) => v,
            PgParam::Bool(v) => v,
            PgParam::Text(v) => v,
            PgParam::Uuid(v) => v,
            PgParam::Timestamp(v) => v,
            PgParam::TimestampTz(v) => v,
        }
    }
}

fn integer(value: &AuditValue, ty: &Type, column: &str) -> RevendResult<Option<i64>> {
    match value {
        AuditValue::Null => Ok(None),
        AuditValue::Integer(v) => Ok(Some(*v)),
        other => Err(mismatch(column, ty, other)),
    }
}

fn narrow<T: TryFrom<i64>>(value: Option<i64>, ty: &Type, column: &str) -> RevendResult<Option<T>> {
    value
        .map(|v| {
            T::try_from(v).map_err(|_| {
                RevendError::from(DataAccessError::TypeMismatch {
                    column: column.to_string(),
                    expected: ty.name().to_string(),
                    found: format!("out of range integer {}", v),
                })
            })
        })
        .transpose()
}

fn timestamp(value: &AuditValue, column: &str) -> RevendResult<Option<DateTime<Utc>>> {
    match value.clone().normalize_timestamp(column)? {
        AuditValue::Timestamp(ts) => Ok(Some(ts)),
        _ => Ok(None),
    }
}

fn mismatch(column: &str, ty: &Type, found: &AuditValue) -> RevendError {
    DataAccessError::TypeMismatch {
        column: column.to_string(),
        expected: ty.name().to_string(),
        found: found.type_name().to_string(),
    }
    .into()
}

// ============================================================================
// DECODING
// ============================================================================

/// Read column `index` of a result row.
pub fn decode(row: &Row, index: usize) -> RevendResult<AuditValue> {
    let column = row.columns().get(index).ok_or_else(|| {
        RevendError::from(DataAccessError::CursorFailed {
            reason: format!("result has no column {}", index),
        })
    })?;
    let name = column.name();
    let ty = column.type_();

    let value = match *ty {
        Type::INT2 => get::<i16>(row, index, name)?.map(|v| AuditValue::Integer(v.into())),
        Type::INT4 => get::<i32>(row, index, name)?.map(|v| AuditValue::Integer(v.into())),
        Type::INT8 => get::<i64>(row, index, name)?.map(AuditValue::Integer),
        Type::BOOL => get::<bool>(row, index, name)?.map(AuditValue::Bool),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            get::<String>(row, index, name)?.map(AuditValue::Text)
        }
        Type::UUID => get::<Uuid>(row, index, name)?.map(AuditValue::Uuid),
        Type::TIMESTAMP => {
            get::<NaiveDateTime>(row, index, name)?.map(|v| AuditValue::Timestamp(v.and_utc()))
        }
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, index, name)?.map(AuditValue::Timestamp),
        _ => {
            return Err(DataAccessError::TypeMismatch {
                column: name.to_string(),
                expected: "a supported column type".to_string(),
                found: ty.name().to_string(),
            }
            .into())
        }
    };
    Ok(value.unwrap_or(AuditValue::Null))
}

fn get<'r, T>(row: &'r Row, index: usize, name: &str) -> RevendResult<Option<T>>
where
    T: tokio_postgres::types::FromSql<'r>,
{
    row.try_get::<_, Option<T>>(index).map_err(|e| {
        DataAccessError::TypeMismatch {
            column: name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
            found: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bind_narrows_integers() {
        assert_eq!(
            PgParam::bind(&AuditValue::Integer(7), &Type::INT4, "REVEND").unwrap(),
            PgParam::Int(Some(7))
        );
        assert_eq!(
            PgParam::bind(&AuditValue::Integer(7), &Type::INT2, "REVEND").unwrap(),
            PgParam::SmallInt(Some(7))
        );
        assert_eq!(
            PgParam::bind(&AuditValue::Integer(7), &Type::INT8, "id").unwrap(),
            PgParam::Long(Some(7))
        );
    }

    #[test]
    fn test_bind_rejects_out_of_range() {
        let result = PgParam::bind(&AuditValue::Integer(i64::MAX), &Type::INT4, "REVEND");
        assert!(matches!(
            result,
            Err(RevendError::DataAccess(DataAccessError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_bind_null_keeps_column_type() {
        assert_eq!(
            PgParam::bind(&AuditValue::Null, &Type::INT4, "REVEND").unwrap(),
            PgParam::Int(None)
        );
        assert_eq!(
            PgParam::bind(&AuditValue::Null, &Type::TIMESTAMP, "REVEND_TSTMP").unwrap(),
            PgParam::Timestamp(None)
        );
    }

    #[test]
    fn test_bind_timestamp_variants() {
        let ts = Utc.timestamp_millis_opt(9_000).unwrap();
        assert_eq!(
            PgParam::bind(&AuditValue::Timestamp(ts), &Type::TIMESTAMP, "t").unwrap(),
            PgParam::Timestamp(Some(ts.naive_utc()))
        );
        assert_eq!(
            PgParam::bind(&AuditValue::Timestamp(ts), &Type::TIMESTAMPTZ, "t").unwrap(),
            PgParam::TimestampTz(Some(ts))
        );
        // Epoch millis are accepted for timestamp columns.
        assert_eq!(
            PgParam::bind(&AuditValue::Integer(9_000), &Type::TIMESTAMPTZ, "t").unwrap(),
            PgParam::TimestampTz(Some(ts))
        );
    }

    #[test]
    fn test_bind_rejects_wrong_kind() {
        assert!(PgParam::bind(&AuditValue::Text("x".into()), &Type::INT4, "REVEND").is_err());
        assert!(PgParam::bind(&AuditValue::Integer(1), &Type::JSONB, "doc").is_err());
    }
}
