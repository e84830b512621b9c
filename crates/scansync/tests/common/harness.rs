//! Test harness running the whole pipeline in-process.
//!
//! The `TestHarness` struct wires every consuming stage to one
//! `MemoryBroker`, each under its own `Supervisor`, exactly like the
//! binary does with separate processes. It provides:
//! - A temporary watch root with an in-memory database
//! - Fake OCR, naming and remote storage backends
//! - Helpers to submit detection groups and wait for terminal statuses

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scansync::config::Config;
use scansync::db::scanned_repo::{self, ScannedDataRow};
use scansync::db::target_repo::{self, NewTarget};
use scansync::processor::FilenameBackend;
use scansync::retry::RetryPolicy;
use scansync::settings::FileNamingBackend;
use scansync::storage::FailedArea;
use scansync::transport::memory::MemoryBroker;
use scansync::transport::{Broker, METADATA_QUEUE};
use scansync::worker::naming::BackendSource;
use scansync::worker::scanner::group_by_content;
use scansync::{
    Database, ItemUpdateBroadcaster, MetadataStage, NamingStage, OcrStage, ProcessStatus,
    SettingsService, Stage, StatusSink, Supervisor, TransportError, UploadStage,
};

use super::fakes::{CopyOcr, RecordingRemote, StubPreview};

const WAIT_TIMEOUT: Duration = Duration::from_secs(15);
const WAIT_POLL: Duration = Duration::from_millis(25);

/// Isolated pipeline with all four consuming stages.
pub struct TestHarness {
    /// Temporary directory holding the watch root and previews.
    temp_dir: TempDir,
    /// Watch root; subdirectories act as SMB targets.
    pub watch_dir: PathBuf,
    pub config: Config,
    pub db: Database,
    pub broker: MemoryBroker,
    pub updates: Arc<ItemUpdateBroadcaster>,
    pub settings: Arc<SettingsService>,
    /// Storage the upload stage writes to. Replace before `start`.
    pub remote: Arc<RecordingRemote>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<Result<(), TransportError>>>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let watch_dir = temp_dir.path().join("scans");
        std::fs::create_dir_all(&watch_dir).expect("Failed to create watch directory");

        let mut config = Config::with_watch_directory(&watch_dir);
        config.preview_directory = temp_dir.path().join("previews");
        config.metadata.classification_timeout_secs = 1;
        config.metadata.classification_poll_secs = 1;

        let db = Database::open_in_memory().expect("Failed to open database");
        let settings =
            Arc::new(SettingsService::open(db.clone()).expect("Failed to open settings"));

        Self {
            temp_dir,
            watch_dir,
            config,
            db,
            broker: MemoryBroker::new(),
            updates: Arc::new(ItemUpdateBroadcaster::new(512)),
            settings,
            remote: Arc::new(RecordingRemote::default()),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.config.failed_path()
    }

    /// Path of `relative` below the watch root.
    pub fn scan_path(&self, relative: &str) -> PathBuf {
        self.watch_dir.join(relative)
    }

    /// Maps an SMB target to a remote folder.
    pub fn add_target(&self, smb_name: &str, folder_id: &str) {
        target_repo::insert(
            &self.db,
            &NewTarget {
                smb_name: smb_name.to_string(),
                drive_id: "drive-1".to_string(),
                folder_id: folder_id.to_string(),
                onedrive_path: format!("/Scans/{}", smb_name),
                web_url: None,
            },
        )
        .expect("Failed to insert target");
    }

    /// Selects a naming backend in the runtime settings.
    pub fn enable_naming(&self) {
        self.settings
            .update(|s| {
                s.file_naming = FileNamingBackend::Ollama {
                    server_url: "localhost".to_string(),
                    server_port: 11434,
                    model: "llama3".to_string(),
                }
            })
            .expect("Failed to update settings");
    }

    fn sink(&self) -> StatusSink {
        StatusSink::new(self.db.clone(), self.updates.clone())
    }

    /// Starts every consuming stage. The naming stage uses `namer` instead
    /// of a backend built from the settings.
    pub fn start(&mut self, ocr: CopyOcr, namer: Arc<dyn FilenameBackend>) {
        let metadata = MetadataStage::new(&self.config, self.sink(), Arc::new(StubPreview));
        let ocr = OcrStage::new(self.sink(), Arc::new(ocr), self.settings.clone());
        let naming = NamingStage::new(self.sink(), BackendSource::Fixed(namer));
        let upload = UploadStage::new(
            self.sink(),
            self.remote.clone(),
            FailedArea::new(self.failed_dir()),
            self.config.keep_originals,
        );

        self.spawn(metadata);
        self.spawn(ocr);
        self.spawn(naming);
        self.spawn(upload);
    }

    /// Runs `stage` under its own supervisor until shutdown.
    pub fn spawn<S: Stage + 'static>(&mut self, stage: S) {
        let broker: Arc<dyn Broker> = Arc::new(self.broker.clone());
        let supervisor = Supervisor::with_policy(
            broker,
            RetryPolicy::fixed(3, Duration::from_millis(10)),
            Duration::from_millis(20),
        );
        let cancel = self.cancel.clone();
        self.tasks
            .push(tokio::spawn(async move { supervisor.run(&stage, cancel).await }));
    }

    /// Groups `paths` by content and puts the groups on the metadata queue.
    pub fn submit(&self, paths: &[PathBuf]) {
        for message in group_by_content(paths, 4096) {
            let payload = serde_json::to_vec(&message).expect("Failed to encode message");
            self.broker.push(METADATA_QUEUE, &payload);
        }
    }

    /// Waits until `count` items exist and all of them reached a terminal status.
    pub async fn wait_for_terminal(&self, count: usize) -> Vec<ScannedDataRow> {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let rows = scanned_repo::list_recent(&self.db, 100).expect("Failed to list items");
            let done = rows.len() >= count
                && rows.iter().all(|row| {
                    row.file_status
                        .parse::<ProcessStatus>()
                        .map(|s| s.is_terminal())
                        .unwrap_or(false)
                });
            if done {
                return rows;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "Timed out waiting for {} terminal items, have: {:?}",
                    count,
                    rows.iter()
                        .map(|r| (r.file_name.clone(), r.file_status.clone()))
                        .collect::<Vec<_>>()
                );
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Cancels every stage and checks they stopped cleanly.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let result = task.await.expect("Stage task panicked");
            assert!(result.is_ok(), "Stage stopped with {:?}", result);
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
