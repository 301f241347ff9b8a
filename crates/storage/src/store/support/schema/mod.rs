#![forbid(unsafe_code)]

mod sql;

use super::super::StoreError;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeSet;

pub(in crate::store) const SCHEMA_VERSION: i64 = 1;

pub(in crate::store) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    preflight_gate(conn)?;
    conn.execute_batch(&sql::full_schema_sql())?;
    Ok(())
}

/// Refuses databases this build did not create. Nothing is migrated in place.
fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = sql::REQUIRED_TABLES.iter().copied().collect();
    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()))
    {
        return Err(StoreError::ResetRequired("unsupported tables detected"));
    }

    let version = if tables.contains("space_state") {
        conn.query_row(
            "SELECT schema_version FROM space_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
    } else {
        None
    };

    match version {
        Some(v) if v != SCHEMA_VERSION => Err(StoreError::ResetRequired("schema version mismatch")),
        _ => Ok(()),
    }
}
