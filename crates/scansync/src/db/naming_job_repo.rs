//! File-naming job repository: one row per naming attempt of an item.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::item::FileNamingStatus;

#[derive(Debug, Clone)]
pub struct NamingJobRow {
    pub id: i64,
    pub scanneddata_id: i64,
    pub file_naming_status: String,
    pub model: Option<String>,
    pub method: Option<String>,
    pub success: Option<bool>,
    pub error_description: Option<String>,
    pub started: String,
    pub finished: Option<String>,
}

impl NamingJobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            scanneddata_id: row.get("scanneddata_id")?,
            file_naming_status: row.get("file_naming_status")?,
            model: row.get("model")?,
            method: row.get("method")?,
            success: row.get("success")?,
            error_description: row.get("error_description")?,
            started: row.get("started")?,
            finished: row.get("finished")?,
        })
    }
}

/// Final state of a naming job.
#[derive(Debug, Clone)]
pub struct NamingJobOutcome<'a> {
    pub status: FileNamingStatus,
    pub model: Option<&'a str>,
    pub method: Option<&'a str>,
    pub error_description: Option<&'a str>,
}

/// Creates a pending job for an item and returns its id.
pub fn insert(db: &Database, scanneddata_id: i64) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO file_naming_jobs (scanneddata_id, file_naming_status) VALUES (?1, ?2)",
            params![scanneddata_id, FileNamingStatus::Pending.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Moves a job to an intermediate status.
pub fn set_status(db: &Database, id: i64, status: FileNamingStatus) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE file_naming_jobs SET file_naming_status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                table: "file_naming_jobs",
                id,
            });
        }
        Ok(())
    })
}

/// Records the terminal status of a job.
pub fn finish(db: &Database, id: i64, outcome: &NamingJobOutcome<'_>) -> Result<(), DatabaseError> {
    let success = outcome.status == FileNamingStatus::Completed;
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE file_naming_jobs SET file_naming_status = ?1, model = ?2, method = ?3,
             success = ?4, error_description = ?5, finished = datetime('now')
             WHERE id = ?6",
            params![
                outcome.status.as_str(),
                outcome.model,
                outcome.method,
                success,
                outcome.error_description,
                id
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                table: "file_naming_jobs",
                id,
            });
        }
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<NamingJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM file_naming_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], NamingJobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// All naming jobs of one item, oldest first.
pub fn list_for_item(db: &Database, scanneddata_id: i64) -> Result<Vec<NamingJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM file_naming_jobs WHERE scanneddata_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![scanneddata_id], NamingJobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
