#![forbid(unsafe_code)]

use super::super::StoreError;
use rusqlite::ErrorCode;

pub(in crate::store) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

pub(in crate::store) fn to_sqlite_i64(value: usize) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("numeric overflow"))
}

pub(in crate::store) fn from_sqlite_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

pub(in crate::store) fn bool_to_sqlite(value: bool) -> i64 {
    if value { 1 } else { 0 }
}
