//! Target mapping repository: which remote folder a watched subdirectory syncs to.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::item::RemoteDestination;

#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    pub id: i64,
    pub smb_name: String,
    pub drive_id: String,
    pub folder_id: String,
    pub onedrive_path: String,
    pub web_url: Option<String>,
    pub created: String,
}

impl TargetRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            smb_name: row.get("smb_name")?,
            drive_id: row.get("drive_id")?,
            folder_id: row.get("folder_id")?,
            onedrive_path: row.get("onedrive_path")?,
            web_url: row.get("web_url")?,
            created: row.get("created")?,
        })
    }

    pub fn destination(&self) -> RemoteDestination {
        RemoteDestination {
            remote_path: self.onedrive_path.clone(),
            folder_id: self.folder_id.clone(),
            drive_id: self.drive_id.clone(),
        }
    }
}

/// Fields of a new or edited target.
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub smb_name: String,
    pub drive_id: String,
    pub folder_id: String,
    pub onedrive_path: String,
    pub web_url: Option<String>,
}

pub fn insert(db: &Database, target: &NewTarget) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO smb_onedrive (smb_name, drive_id, folder_id, onedrive_path, web_url)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                target.smb_name,
                target.drive_id,
                target.folder_id,
                target.onedrive_path,
                target.web_url
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

pub fn update(db: &Database, id: i64, target: &NewTarget) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE smb_onedrive SET smb_name = ?1, drive_id = ?2, folder_id = ?3,
             onedrive_path = ?4, web_url = ?5 WHERE id = ?6",
            params![
                target.smb_name,
                target.drive_id,
                target.folder_id,
                target.onedrive_path,
                target.web_url,
                id
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                table: "smb_onedrive",
                id,
            });
        }
        Ok(())
    })
}

pub fn delete(db: &Database, id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM smb_onedrive WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                table: "smb_onedrive",
                id,
            });
        }
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: i64) -> Result<Option<TargetRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM smb_onedrive WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], TargetRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Every mapping registered for a watched subdirectory name.
pub fn find_by_name(db: &Database, smb_name: &str) -> Result<Vec<TargetRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM smb_onedrive WHERE smb_name = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![smb_name], TargetRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn list(db: &Database) -> Result<Vec<TargetRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM smb_onedrive ORDER BY smb_name, id")?;
        let rows = stmt
            .query_map([], TargetRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
