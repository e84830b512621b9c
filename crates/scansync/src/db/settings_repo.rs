//! Key/value store for runtime settings, versioned by a revision counter.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// A stored value together with its revision.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub value: String,
    pub revision: i64,
}

pub fn get(db: &Database, key: &str) -> Result<Option<StoredValue>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT value, revision FROM app_settings WHERE key = ?1",
                params![key],
                |r| {
                    Ok(StoredValue {
                        value: r.get(0)?,
                        revision: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}

/// Writes a value and returns the new revision.
pub fn put(db: &Database, key: &str, value: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let revision = conn.query_row(
            "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               revision = app_settings.revision + 1,
               updated_at = datetime('now')
             RETURNING revision",
            params![key, value],
            |r| r.get(0),
        )?;
        Ok(revision)
    })
}
