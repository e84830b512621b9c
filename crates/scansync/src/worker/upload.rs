//! Upload stage: pushes the OCR output to every remote destination.
//!
//! Progress is persisted per destination. When every upload succeeded the
//! local files are cleaned up; otherwise they are moved into the failed
//! area together with the working OCR file.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::Instrument;

use super::{blocking, settle_failure, Stage, StageError};
use crate::broadcast::StatusSink;
use crate::db::scanned_repo::ScannedDataUpdate;
use crate::item::{Item, ProcessStatus};
use crate::sanitize::redact_path;
use crate::storage::{remove_if_exists, FailedArea, OcrArtifact, RemoteStorage};
use crate::transport::{Publisher, UPLOAD_QUEUE};

pub struct UploadStage {
    sink: StatusSink,
    remote: Arc<dyn RemoteStorage>,
    failed: FailedArea,
    keep_originals: bool,
}

impl UploadStage {
    pub fn new(
        sink: StatusSink,
        remote: Arc<dyn RemoteStorage>,
        failed: FailedArea,
        keep_originals: bool,
    ) -> Self {
        Self {
            sink,
            remote,
            failed,
            keep_originals,
        }
    }

    pub async fn process(&self, mut item: Item) -> Result<(), StageError> {
        let id = item.require_db_id()?;
        let span = tracing::info_span!(
            "stage.upload",
            item_id = id,
            file = %redact_path(&item.local_file_path)
        );

        async move {
            let result = self.deliver(&mut item).await;
            if let Err(e) = &result {
                if settle_failure(&self.sink, &mut item, ProcessStatus::SyncFailed, e).await {
                    self.relocate(&item).await;
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn deliver(&self, item: &mut Item) -> Result<(), StageError> {
        let ocr_file = item.ocr_file();
        if !ocr_file.exists() {
            tracing::error!("No OCR file to upload");
            return self.fail(item).await;
        }
        if item.destinations.is_empty() {
            tracing::error!(smb_target = %item.smb_target, "No remote destination configured");
            return self.fail(item).await;
        }

        item.time_upload_started = Some(Utc::now());
        self.sink.transition(item, ProcessStatus::Sync).await?;

        let name = item.upload_name();
        let destinations = item.destinations.clone();
        let mut failures = 0;
        for (index, destination) in destinations.iter().enumerate() {
            item.current_uploading = index as u32 + 1;
            item.current_upload_target = Some(destination.remote_path.clone());
            self.sink.persist(item, ScannedDataUpdate::new()).await?;

            tracing::info!(
                destination = %destination.remote_path,
                index = index + 1,
                total = destinations.len(),
                "Uploading"
            );
            match self.remote.upload(&ocr_file, &name, destination).await {
                Ok(uploaded) => {
                    tracing::info!(
                        destination = %destination.remote_path,
                        name = uploaded.name.as_deref().unwrap_or(&name),
                        "Upload finished"
                    );
                    if let Some(url) = uploaded.web_url {
                        item.web_url = Some(url.clone());
                        self.sink
                            .persist(item, ScannedDataUpdate::new().web_url(url))
                            .await?;
                    }
                }
                Err(e) => {
                    tracing::error!(destination = %destination.remote_path, error = %e, "Upload failed");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            tracing::error!(failures, "Not every destination received the file");
            return self.fail(item).await;
        }

        self.clean_up(item).await?;
        item.time_finished = Some(Utc::now());
        self.sink.transition(item, ProcessStatus::Completed).await?;
        tracing::info!("Item completed");
        Ok(())
    }

    /// Marks the item failed and moves its files into the failed area.
    async fn fail(&self, item: &mut Item) -> Result<(), StageError> {
        self.sink.transition(item, ProcessStatus::SyncFailed).await?;
        self.relocate(item).await;
        Ok(())
    }

    async fn relocate(&self, item: &Item) {
        let failed = self.failed.clone();
        let snapshot = item.clone();
        match blocking(move || failed.relocate_item(&snapshot, OcrArtifact::Relocate)).await {
            Ok(moved) => tracing::info!(files = moved.len(), "Moved item to the failed directory"),
            Err(e) => tracing::error!(error = %e, "Could not move item to the failed directory"),
        }
    }

    async fn clean_up(&self, item: &Item) -> Result<(), StageError> {
        let mut doomed: Vec<PathBuf> = vec![item.ocr_file()];
        if self.keep_originals {
            tracing::debug!("Keeping original files");
        } else {
            doomed.push(item.local_file_path.clone());
            doomed.extend(item.additional_local_paths.iter().cloned());
        }

        blocking(move || {
            for path in &doomed {
                if let Err(e) = remove_if_exists(path) {
                    tracing::warn!(file = %redact_path(path), error = %e, "Could not remove local file");
                }
            }
        })
        .await
    }
}

#[async_trait]
impl Stage for UploadStage {
    fn name(&self) -> &'static str {
        "upload"
    }

    fn queue(&self) -> &'static str {
        UPLOAD_QUEUE
    }

    fn queues(&self) -> &'static [&'static str] {
        &[UPLOAD_QUEUE]
    }

    async fn handle(&self, payload: &[u8], _publisher: &dyn Publisher) -> Result<(), StageError> {
        let item = Item::from_payload(payload)?;
        self.process(item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ItemUpdateBroadcaster;
    use crate::db::{scanned_repo, Database};
    use crate::item::RemoteDestination;
    use crate::storage::{UploadError, UploadedFile};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records uploads and fails for folder ids listed in `failing`.
    #[derive(Default)]
    struct FakeRemote {
        failing: Vec<String>,
        uploads: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RemoteStorage for FakeRemote {
        async fn upload(
            &self,
            local: &Path,
            name: &str,
            destination: &RemoteDestination,
        ) -> Result<UploadedFile, UploadError> {
            assert!(local.exists());
            self.uploads
                .lock()
                .unwrap()
                .push((destination.folder_id.clone(), name.to_string()));
            if self.failing.contains(&destination.folder_id) {
                return Err(UploadError::Http {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(UploadedFile {
                name: Some(name.to_string()),
                web_url: Some(format!("https://drive.example/{}/{}", destination.folder_id, name)),
            })
        }
    }

    fn destination(folder: &str) -> RemoteDestination {
        RemoteDestination {
            remote_path: format!("/Documents/{}", folder),
            folder_id: folder.into(),
            drive_id: "D1".into(),
        }
    }

    struct Setup {
        dir: TempDir,
        db: Database,
        item: Item,
    }

    fn setup() -> Setup {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Finance/scan.pdf");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"original").unwrap();

        let db = Database::open_in_memory().unwrap();
        let mut item = Item::new(&path).unwrap();
        let id = scanned_repo::insert(&db, &item.filename, &item.smb_target).unwrap();
        item.assign_db_id(id).unwrap();
        item.status = ProcessStatus::SyncPending;
        std::fs::write(item.ocr_file(), b"ocr").unwrap();
        Setup { dir, db, item }
    }

    fn stage(s: &Setup, remote: Arc<FakeRemote>, keep_originals: bool) -> UploadStage {
        let sink = StatusSink::new(s.db.clone(), Arc::new(ItemUpdateBroadcaster::default()));
        UploadStage::new(
            sink,
            remote,
            FailedArea::new(s.dir.path().join("failed-documents")),
            keep_originals,
        )
    }

    fn row(s: &Setup) -> scanned_repo::ScannedDataRow {
        scanned_repo::find_by_id(&s.db, s.item.db_id().unwrap())
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_uploads_to_every_destination_and_cleans_up() {
        let mut s = setup();
        let extra = s.dir.path().join("Archive/scan.pdf");
        std::fs::create_dir_all(extra.parent().unwrap()).unwrap();
        std::fs::write(&extra, b"original").unwrap();
        s.item.add_additional_path(&extra);
        s.item.destinations = vec![destination("F1"), destination("F2")];

        let remote = Arc::new(FakeRemote::default());
        stage(&s, remote.clone(), false)
            .process(s.item.clone())
            .await
            .unwrap();

        assert_eq!(
            *remote.uploads.lock().unwrap(),
            vec![
                ("F1".to_string(), "scan.pdf".to_string()),
                ("F2".to_string(), "scan.pdf".to_string())
            ]
        );
        assert!(!s.item.ocr_file().exists());
        assert!(!s.item.local_file_path.exists());
        assert!(!extra.exists());

        let row = row(&s);
        assert_eq!(row.file_status, ProcessStatus::Completed.to_string());
        assert_eq!(row.status_code, 5);
        assert_eq!(row.current_uploading, 2);
        assert_eq!(row.current_upload_target.as_deref(), Some("/Documents/F2"));
        assert_eq!(
            row.web_url.as_deref(),
            Some("https://drive.example/F2/scan.pdf")
        );
    }

    #[tokio::test]
    async fn test_keep_originals_only_removes_ocr_file() {
        let mut s = setup();
        s.item.destinations = vec![destination("F1")];

        stage(&s, Arc::new(FakeRemote::default()), true)
            .process(s.item.clone())
            .await
            .unwrap();

        assert!(!s.item.ocr_file().exists());
        assert!(s.item.local_file_path.exists());
        assert_eq!(row(&s).file_status, ProcessStatus::Completed.to_string());
    }

    #[tokio::test]
    async fn test_partial_failure_relocates_everything() {
        let mut s = setup();
        s.item.destinations = vec![destination("F1"), destination("F2")];
        let remote = Arc::new(FakeRemote {
            failing: vec!["F1".into()],
            ..Default::default()
        });

        stage(&s, remote.clone(), false)
            .process(s.item.clone())
            .await
            .unwrap();

        assert_eq!(remote.uploads.lock().unwrap().len(), 2);
        let failed = s.dir.path().join("failed-documents");
        assert!(failed.join("scan.pdf").exists());
        assert!(failed.join("scan_OCR.pdf").exists());
        assert!(!s.item.local_file_path.exists());

        let row = row(&s);
        assert_eq!(row.file_status, ProcessStatus::SyncFailed.to_string());
        assert_eq!(row.status_code, -1);
    }

    #[tokio::test]
    async fn test_no_destination_fails_without_upload() {
        let s = setup();
        let remote = Arc::new(FakeRemote::default());

        stage(&s, remote.clone(), false)
            .process(s.item.clone())
            .await
            .unwrap();

        assert!(remote.uploads.lock().unwrap().is_empty());
        assert!(s.dir.path().join("failed-documents/scan.pdf").exists());
        assert_eq!(row(&s).file_status, ProcessStatus::SyncFailed.to_string());
    }

    #[tokio::test]
    async fn test_missing_ocr_file_fails_without_upload() {
        let mut s = setup();
        s.item.destinations = vec![destination("F1")];
        std::fs::remove_file(s.item.ocr_file()).unwrap();
        let remote = Arc::new(FakeRemote::default());

        stage(&s, remote.clone(), false)
            .process(s.item.clone())
            .await
            .unwrap();

        assert!(remote.uploads.lock().unwrap().is_empty());
        assert!(s.dir.path().join("failed-documents/scan.pdf").exists());
        assert_eq!(row(&s).file_status, ProcessStatus::SyncFailed.to_string());
    }

    #[tokio::test]
    async fn test_internal_error_marks_sync_failed_and_relocates() {
        let mut s = setup();
        s.item.destinations = vec![destination("F1")];
        s.db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_syncing BEFORE UPDATE ON scanneddata
                 WHEN NEW.file_status = 'Syncing'
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )?;
            Ok(())
        })
        .unwrap();
        let remote = Arc::new(FakeRemote::default());

        let result = stage(&s, remote.clone(), false)
            .process(s.item.clone())
            .await;

        assert!(matches!(result, Err(StageError::Sink(_))));
        assert!(remote.uploads.lock().unwrap().is_empty());
        let failed = s.dir.path().join("failed-documents");
        assert!(failed.join("scan.pdf").exists());
        assert!(failed.join("scan_OCR.pdf").exists());
        assert_eq!(row(&s).file_status, ProcessStatus::SyncFailed.to_string());
        assert_eq!(row(&s).status_code, -1);
    }
}
