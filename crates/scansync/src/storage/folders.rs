//! Target mappings together with their watched folders.
//!
//! Every mapping in `smb_onedrive` corresponds to a subdirectory of the
//! watch root named after `smb_name`. The database is authoritative;
//! folder operations that fail are logged and do not undo the row change.

use std::path::{Path, PathBuf};

use crate::db::target_repo::{self, NewTarget};
use crate::db::{Database, DatabaseError};

pub struct TargetManager {
    db: Database,
    watch_root: PathBuf,
}

impl TargetManager {
    pub fn new<P: AsRef<Path>>(db: Database, watch_root: P) -> Self {
        Self {
            db,
            watch_root: watch_root.as_ref().to_path_buf(),
        }
    }

    pub fn folder_for(&self, smb_name: &str) -> PathBuf {
        self.watch_root.join(smb_name)
    }

    /// Registers a mapping and creates its folder when missing.
    pub fn add(&self, target: &NewTarget) -> Result<i64, DatabaseError> {
        let id = target_repo::insert(&self.db, target)?;
        log::debug!("Target '{}' stored with id {}", target.smb_name, id);

        let folder = self.folder_for(&target.smb_name);
        if folder.exists() {
            log::warn!("Folder for target '{}' already exists", target.smb_name);
        } else {
            create_folder(&folder);
        }
        Ok(id)
    }

    /// Updates a mapping. A changed name renames the folder, or creates the
    /// new one when the old folder is gone.
    pub fn edit(&self, id: i64, target: &NewTarget) -> Result<(), DatabaseError> {
        let existing = target_repo::find_by_id(&self.db, id)?.ok_or(DatabaseError::NotFound {
            table: "smb_onedrive",
            id,
        })?;

        if existing.smb_name != target.smb_name {
            let old_folder = self.folder_for(&existing.smb_name);
            let new_folder = self.folder_for(&target.smb_name);
            if old_folder.exists() {
                match std::fs::rename(&old_folder, &new_folder) {
                    Ok(()) => log::info!(
                        "Renamed target folder '{}' to '{}'",
                        existing.smb_name,
                        target.smb_name
                    ),
                    Err(e) => log::error!(
                        "Failed to rename target folder '{}' to '{}': {}",
                        existing.smb_name,
                        target.smb_name,
                        e
                    ),
                }
            } else {
                log::warn!("Folder for target '{}' does not exist", existing.smb_name);
                if !new_folder.exists() {
                    create_folder(&new_folder);
                }
            }
        }

        target_repo::update(&self.db, id, target)
    }

    /// Deletes a mapping and its folder, including anything inside it.
    pub fn remove(&self, id: i64) -> Result<(), DatabaseError> {
        let existing = target_repo::find_by_id(&self.db, id)?.ok_or(DatabaseError::NotFound {
            table: "smb_onedrive",
            id,
        })?;

        let folder = self.folder_for(&existing.smb_name);
        if folder.exists() {
            match std::fs::remove_dir_all(&folder) {
                Ok(()) => log::info!("Deleted folder of target '{}'", existing.smb_name),
                Err(e) => log::error!(
                    "Failed to delete folder of target '{}': {}",
                    existing.smb_name,
                    e
                ),
            }
        } else {
            log::warn!("Folder for target '{}' does not exist", existing.smb_name);
        }

        target_repo::delete(&self.db, id)
    }
}

fn create_folder(folder: &Path) {
    match std::fs::create_dir_all(folder) {
        Ok(()) => log::info!("Created target folder {}", folder.display()),
        Err(e) => log::error!("Failed to create target folder {}: {}", folder.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target(name: &str) -> NewTarget {
        NewTarget {
            smb_name: name.to_string(),
            drive_id: "D1".to_string(),
            folder_id: "F1".to_string(),
            onedrive_path: format!("/Documents/{}", name),
            web_url: None,
        }
    }

    fn setup() -> (TempDir, Database, TargetManager) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let manager = TargetManager::new(db.clone(), dir.path());
        (dir, db, manager)
    }

    #[test]
    fn test_add_creates_folder() {
        let (dir, db, manager) = setup();
        let id = manager.add(&target("Finance")).unwrap();

        assert!(dir.path().join("Finance").is_dir());
        let row = target_repo::find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(row.onedrive_path, "/Documents/Finance");
    }

    #[test]
    fn test_edit_renames_folder_with_contents() {
        let (dir, db, manager) = setup();
        let id = manager.add(&target("Finance")).unwrap();
        std::fs::write(dir.path().join("Finance/waiting.pdf"), b"x").unwrap();

        manager.edit(id, &target("Accounting")).unwrap();

        assert!(!dir.path().join("Finance").exists());
        assert!(dir.path().join("Accounting/waiting.pdf").exists());
        let row = target_repo::find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(row.smb_name, "Accounting");
    }

    #[test]
    fn test_edit_creates_new_folder_when_old_is_missing() {
        let (dir, _db, manager) = setup();
        let id = manager.add(&target("Finance")).unwrap();
        std::fs::remove_dir(dir.path().join("Finance")).unwrap();

        manager.edit(id, &target("Accounting")).unwrap();
        assert!(dir.path().join("Accounting").is_dir());
    }

    #[test]
    fn test_remove_deletes_folder_and_row() {
        let (dir, db, manager) = setup();
        let id = manager.add(&target("Finance")).unwrap();
        std::fs::write(dir.path().join("Finance/left.pdf"), b"x").unwrap();

        manager.remove(id).unwrap();
        assert!(!dir.path().join("Finance").exists());
        assert!(target_repo::find_by_id(&db, id).unwrap().is_none());
    }

    #[test]
    fn test_unknown_id() {
        let (_dir, _db, manager) = setup();
        assert!(matches!(
            manager.remove(42),
            Err(DatabaseError::NotFound { id: 42, .. })
        ));
        assert!(matches!(
            manager.edit(42, &target("x")),
            Err(DatabaseError::NotFound { id: 42, .. })
        ));
    }
}
