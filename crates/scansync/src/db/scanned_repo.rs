//! Item repository: operations on the `scanneddata` table.

use rusqlite::types::ToSql;
use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::item::{OcrStatus, ProcessStatus};

/// A raw item row from the database.
#[derive(Debug, Clone)]
pub struct ScannedDataRow {
    pub id: i64,
    pub file_name: String,
    pub local_filepath: Option<String>,
    pub file_status: String,
    pub status_code: i32,
    pub remote_filepath: Option<String>,
    pub pdf_pages: Option<i64>,
    pub previewimage_path: Option<String>,
    pub web_url: Option<String>,
    pub additional_smb: Option<String>,
    pub ocr_status: i32,
    pub current_uploading: i64,
    pub current_upload_target: Option<String>,
    pub created: String,
    pub modified: String,
}

impl ScannedDataRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_name: row.get("file_name")?,
            local_filepath: row.get("local_filepath")?,
            file_status: row.get("file_status")?,
            status_code: row.get("status_code")?,
            remote_filepath: row.get("remote_filepath")?,
            pdf_pages: row.get("pdf_pages")?,
            previewimage_path: row.get("previewimage_path")?,
            web_url: row.get("web_url")?,
            additional_smb: row.get("additional_smb")?,
            ocr_status: row.get("ocr_status")?,
            current_uploading: row.get("current_uploading")?,
            current_upload_target: row.get("current_upload_target")?,
            created: row.get("created")?,
            modified: row.get("modified")?,
        })
    }
}

/// Typed partial update of a `scanneddata` row.
///
/// Only the fields that were set end up in the generated `UPDATE`.
/// Setting the status also writes the matching `status_code`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScannedDataUpdate {
    file_name: Option<String>,
    local_filepath: Option<String>,
    file_status: Option<ProcessStatus>,
    remote_filepath: Option<String>,
    pdf_pages: Option<u32>,
    previewimage_path: Option<String>,
    web_url: Option<String>,
    additional_smb: Option<String>,
    ocr_status: Option<OcrStatus>,
    current_uploading: Option<u32>,
    current_upload_target: Option<Option<String>>,
}

impl ScannedDataUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_name(mut self, value: impl Into<String>) -> Self {
        self.file_name = Some(value.into());
        self
    }

    pub fn local_filepath(mut self, value: impl Into<String>) -> Self {
        self.local_filepath = Some(value.into());
        self
    }

    pub fn status(mut self, value: ProcessStatus) -> Self {
        self.file_status = Some(value);
        self
    }

    pub fn remote_filepath(mut self, value: impl Into<String>) -> Self {
        self.remote_filepath = Some(value.into());
        self
    }

    pub fn pdf_pages(mut self, value: u32) -> Self {
        self.pdf_pages = Some(value);
        self
    }

    pub fn previewimage_path(mut self, value: impl Into<String>) -> Self {
        self.previewimage_path = Some(value.into());
        self
    }

    pub fn web_url(mut self, value: impl Into<String>) -> Self {
        self.web_url = Some(value.into());
        self
    }

    pub fn additional_smb(mut self, value: impl Into<String>) -> Self {
        self.additional_smb = Some(value.into());
        self
    }

    pub fn ocr_status(mut self, value: OcrStatus) -> Self {
        self.ocr_status = Some(value);
        self
    }

    pub fn upload_progress(mut self, index: u32, target: Option<String>) -> Self {
        self.current_uploading = Some(index);
        self.current_upload_target = Some(target);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn assignments(&self) -> Vec<(&'static str, Box<dyn ToSql>)> {
        let mut out: Vec<(&'static str, Box<dyn ToSql>)> = Vec::new();
        if let Some(ref v) = self.file_name {
            out.push(("file_name", Box::new(v.clone())));
        }
        if let Some(ref v) = self.local_filepath {
            out.push(("local_filepath", Box::new(v.clone())));
        }
        if let Some(status) = self.file_status {
            out.push(("file_status", Box::new(status.as_str())));
            out.push(("status_code", Box::new(status.progress_code())));
        }
        if let Some(ref v) = self.remote_filepath {
            out.push(("remote_filepath", Box::new(v.clone())));
        }
        if let Some(v) = self.pdf_pages {
            out.push(("pdf_pages", Box::new(v)));
        }
        if let Some(ref v) = self.previewimage_path {
            out.push(("previewimage_path", Box::new(v.clone())));
        }
        if let Some(ref v) = self.web_url {
            out.push(("web_url", Box::new(v.clone())));
        }
        if let Some(ref v) = self.additional_smb {
            out.push(("additional_smb", Box::new(v.clone())));
        }
        if let Some(v) = self.ocr_status {
            out.push(("ocr_status", Box::new(v.code())));
        }
        if let Some(v) = self.current_uploading {
            out.push(("current_uploading", Box::new(v)));
        }
        if let Some(ref v) = self.current_upload_target {
            out.push(("current_upload_target", Box::new(v.clone())));
        }
        out
    }
}

/// Inserts a new item row and returns its id.
pub fn insert(db: &Database, file_name: &str, local_filepath: &str) -> Result<i64, DatabaseError> {
    let status = ProcessStatus::FileNotReady;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO scanneddata (file_name, local_filepath, file_status, status_code)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                file_name,
                local_filepath,
                status.as_str(),
                status.progress_code()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Applies a partial update and bumps `modified`.
pub fn update(db: &Database, id: i64, update: &ScannedDataUpdate) -> Result<(), DatabaseError> {
    let assignments = update.assignments();
    let mut clauses: Vec<String> = assignments
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
        .collect();
    clauses.push("modified = datetime('now')".to_string());

    let sql = format!(
        "UPDATE scanneddata SET {} WHERE id = ?{}",
        clauses.join(", "),
        assignments.len() + 1
    );

    db.with_conn(|conn| {
        let mut values: Vec<&dyn ToSql> = assignments.iter().map(|(_, v)| v.as_ref()).collect();
        values.push(&id);
        let changed = conn.execute(&sql, values.as_slice())?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                table: "scanneddata",
                id,
            });
        }
        Ok(())
    })
}

/// Finds an item by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ScannedDataRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM scanneddata WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], ScannedDataRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Most recently modified items first.
pub fn list_recent(db: &Database, limit: u32) -> Result<Vec<ScannedDataRow>, DatabaseError> {
    query_rows(
        db,
        "SELECT * FROM scanneddata ORDER BY modified DESC, id DESC LIMIT ?1",
        limit,
    )
}

/// Items whose status is a failure, most recent first.
pub fn list_failed(db: &Database, limit: u32) -> Result<Vec<ScannedDataRow>, DatabaseError> {
    query_rows(
        db,
        "SELECT * FROM scanneddata WHERE status_code = -1 ORDER BY modified DESC, id DESC LIMIT ?1",
        limit,
    )
}

fn query_rows(db: &Database, sql: &str, limit: u32) -> Result<Vec<ScannedDataRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![limit], ScannedDataRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let id = insert(&db, "scan.pdf", "Finance").unwrap();

        let row = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(row.file_name, "scan.pdf");
        assert_eq!(row.local_filepath.as_deref(), Some("Finance"));
        assert_eq!(row.file_status, "File Not Ready");
        assert_eq!(row.status_code, 0);
        assert!(row.web_url.is_none());
    }

    #[test]
    fn test_ids_are_distinct() {
        let db = test_db();
        let a = insert(&db, "a.pdf", "x").unwrap();
        let b = insert(&db, "b.pdf", "x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_find_missing_returns_none() {
        let db = test_db();
        assert!(find_by_id(&db, 42).unwrap().is_none());
    }

    #[test]
    fn test_partial_update_touches_only_set_fields() {
        let db = test_db();
        let id = insert(&db, "scan.pdf", "Finance").unwrap();
        update(
            &db,
            id,
            &ScannedDataUpdate::new().remote_filepath("/Documents/Finance"),
        )
        .unwrap();
        update(
            &db,
            id,
            &ScannedDataUpdate::new()
                .status(ProcessStatus::OcrPending)
                .pdf_pages(4),
        )
        .unwrap();

        let row = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(row.file_name, "scan.pdf");
        assert_eq!(row.remote_filepath.as_deref(), Some("/Documents/Finance"));
        assert_eq!(row.file_status, "OCR Pending");
        assert_eq!(row.status_code, 1);
        assert_eq!(row.pdf_pages, Some(4));
    }

    #[test]
    fn test_update_status_code_for_failures() {
        let db = test_db();
        let id = insert(&db, "scan.pdf", "Finance").unwrap();
        update(
            &db,
            id,
            &ScannedDataUpdate::new().status(ProcessStatus::SyncFailed),
        )
        .unwrap();
        let row = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(row.status_code, -1);
    }

    #[test]
    fn test_upload_progress_can_be_cleared() {
        let db = test_db();
        let id = insert(&db, "scan.pdf", "Finance").unwrap();
        update(
            &db,
            id,
            &ScannedDataUpdate::new().upload_progress(2, Some("Archive".into())),
        )
        .unwrap();
        let row = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(row.current_uploading, 2);
        assert_eq!(row.current_upload_target.as_deref(), Some("Archive"));

        update(&db, id, &ScannedDataUpdate::new().upload_progress(0, None)).unwrap();
        let row = find_by_id(&db, id).unwrap().unwrap();
        assert!(row.current_upload_target.is_none());
    }

    #[test]
    fn test_update_missing_row() {
        let db = test_db();
        let result = update(&db, 99, &ScannedDataUpdate::new().web_url("https://x"));
        assert!(matches!(result, Err(DatabaseError::NotFound { id: 99, .. })));
    }

    #[test]
    fn test_empty_update_only_bumps_modified() {
        let db = test_db();
        let id = insert(&db, "scan.pdf", "Finance").unwrap();
        assert!(ScannedDataUpdate::new().is_empty());
        update(&db, id, &ScannedDataUpdate::new()).unwrap();
    }

    #[test]
    fn test_list_failed() {
        let db = test_db();
        let ok = insert(&db, "ok.pdf", "x").unwrap();
        let bad = insert(&db, "bad.pdf", "x").unwrap();
        update(&db, ok, &ScannedDataUpdate::new().status(ProcessStatus::Completed)).unwrap();
        update(&db, bad, &ScannedDataUpdate::new().status(ProcessStatus::InvalidFile)).unwrap();

        let failed = list_failed(&db, 10).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, bad);

        let recent = list_recent(&db, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(list_recent(&db, 1).unwrap().len(), 1);
    }
}
