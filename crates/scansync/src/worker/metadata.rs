//! Metadata stage: turns a detected file group into an item record.
//!
//! The record is created first, so every later failure is visible on the
//! dashboard. After that the item's targets are resolved, the file is
//! polled until it parses as a PDF or image, and a preview and page count
//! are added before the item moves on to OCR.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::Instrument;

use super::filter::PathFilter;
use super::scanner::DetectionMessage;
use super::{blocking, settle_failure, Stage, StageError};
use crate::broadcast::StatusSink;
use crate::config::Config;
use crate::db::scanned_repo::{self, ScannedDataUpdate};
use crate::db::target_repo;
use crate::error::ProcessError;
use crate::item::{Item, ItemType, ProcessStatus, RemoteDestination};
use crate::processor::inspector;
use crate::processor::preview::{preview_file, preview_web_path};
use crate::processor::PreviewRenderer;
use crate::sanitize::redact_path;
use crate::storage::{FailedArea, OcrArtifact};
use crate::transport::{forward, Publisher, METADATA_QUEUE, OCR_QUEUE};

/// Accepted payloads: a detection group, or a single path from older producers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MetadataRequest {
    Group(DetectionMessage),
    Single { file_path: PathBuf },
}

impl MetadataRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, StageError> {
        serde_json::from_slice(payload).map_err(|e| StageError::Payload(e.to_string()))
    }

    pub fn into_paths(self) -> Vec<PathBuf> {
        match self {
            MetadataRequest::Group(message) => message.file_paths,
            MetadataRequest::Single { file_path } => vec![file_path],
        }
    }
}

pub struct MetadataStage {
    sink: StatusSink,
    filter: PathFilter,
    failed: FailedArea,
    preview: Arc<dyn PreviewRenderer>,
    preview_directory: PathBuf,
    preview_url_prefix: String,
    classification_timeout: Duration,
    classification_poll: Duration,
}

impl MetadataStage {
    pub fn new(config: &Config, sink: StatusSink, preview: Arc<dyn PreviewRenderer>) -> Self {
        let failed_path = config.failed_path();
        Self {
            sink,
            filter: PathFilter::new(&failed_path),
            failed: FailedArea::new(&failed_path),
            preview,
            preview_directory: config.preview_directory.clone(),
            preview_url_prefix: config.metadata.preview_url_prefix.clone(),
            classification_timeout: Duration::from_secs(config.metadata.classification_timeout_secs),
            classification_poll: Duration::from_secs(config.metadata.classification_poll_secs),
        }
    }

    /// Creates the record for the canonical path and enriches it.
    pub async fn process(
        &self,
        paths: Vec<PathBuf>,
        publisher: &dyn Publisher,
    ) -> Result<(), StageError> {
        let Some((first, rest)) = paths.split_first() else {
            return Err(StageError::Payload("message carries no file paths".into()));
        };
        if !self.filter.admit(first) {
            return Ok(());
        }

        let mut item = Item::new(first)?;
        let id = scanned_repo::insert(self.sink.db(), &item.filename, &item.smb_target)?;
        item.assign_db_id(id)?;

        let span = tracing::info_span!("stage.metadata", item_id = id, file = %redact_path(first));
        async move {
            let result = self.enrich(&mut item, rest, publisher).await;
            if let Err(e) = &result {
                settle_failure(&self.sink, &mut item, ProcessStatus::Failed, e).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn enrich(
        &self,
        item: &mut Item,
        additional: &[PathBuf],
        publisher: &dyn Publisher,
    ) -> Result<(), StageError> {
        tracing::info!("Gathering information about new file");
        self.sink
            .persist(
                &item,
                ScannedDataUpdate::new()
                    .file_name(item.filename.clone())
                    .local_filepath(item.smb_target.clone()),
            )
            .await?;

        self.attach_additional_paths(item, additional).await?;
        self.resolve_destinations(item).await?;

        match self.wait_for_document(&item.local_file_path).await? {
            Classification::Ready(kind) => item.item_type = kind,
            Classification::Gone => return self.mark_deleted(item).await,
            Classification::TimedOut => {
                tracing::warn!(
                    timeout_secs = self.classification_timeout.as_secs(),
                    "File is neither a PDF nor an image"
                );
                self.sink.transition(item, ProcessStatus::InvalidFile).await?;
                let failed = self.failed.clone();
                let relocated = item.clone();
                blocking(move || failed.relocate_item(&relocated, OcrArtifact::Delete)).await?;
                return Ok(());
            }
        }

        if !item.local_file_path.exists() {
            return self.mark_deleted(item).await;
        }
        self.sink.transition(item, ProcessStatus::ReadingMetadata).await?;

        self.render_preview(item).await?;
        if item.item_type == ItemType::Pdf {
            self.read_page_count(item).await?;
        }

        self.sink.transition(item, ProcessStatus::OcrPending).await?;
        let payload = item.to_payload()?;
        if forward(publisher, OCR_QUEUE, &payload).await {
            tracing::info!("Queued for OCR");
        } else {
            self.sink.transition(item, ProcessStatus::Failed).await?;
        }
        Ok(())
    }

    async fn attach_additional_paths(
        &self,
        item: &mut Item,
        additional: &[PathBuf],
    ) -> Result<(), StageError> {
        for path in additional {
            if !item.add_additional_path(path) {
                tracing::warn!(file = %redact_path(path), "Additional path missing or already known");
            }
        }
        if item.additional_remote_paths.is_empty() {
            return Ok(());
        }

        tracing::info!(
            count = item.additional_local_paths.len(),
            "Duplicate copies in other targets"
        );
        let names = item.additional_remote_paths.join(",");
        self.sink
            .persist(item, ScannedDataUpdate::new().additional_smb(names))
            .await?;
        Ok(())
    }

    async fn resolve_destinations(&self, item: &mut Item) -> Result<(), StageError> {
        let mut destinations: Vec<RemoteDestination> = Vec::new();
        for name in item.smb_targets() {
            match target_repo::find_by_name(self.sink.db(), &name) {
                Ok(rows) if rows.is_empty() => {
                    tracing::warn!(smb_target = %name, "No remote destination for target");
                }
                Ok(rows) => {
                    for destination in rows.iter().map(|row| row.destination()) {
                        if !destinations.contains(&destination) {
                            destinations.push(destination);
                        }
                    }
                }
                Err(e) => tracing::error!(smb_target = %name, error = %e, "Target lookup failed"),
            }
        }

        if destinations.is_empty() {
            tracing::warn!("Item has no remote destination and will fail at upload");
            return Ok(());
        }

        let remote = destinations
            .iter()
            .map(|d| d.remote_path.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        item.destinations = destinations;
        self.sink
            .persist(item, ScannedDataUpdate::new().remote_filepath(remote))
            .await?;
        Ok(())
    }

    /// Polls until the file parses, disappears or the timeout passes.
    async fn wait_for_document(&self, path: &Path) -> Result<Classification, StageError> {
        let started = Instant::now();
        loop {
            if !path.exists() {
                return Ok(Classification::Gone);
            }
            let candidate = path.to_path_buf();
            if let Some(kind) = blocking(move || inspector::classify(&candidate)).await? {
                tracing::debug!(kind = ?kind, "File classified");
                return Ok(Classification::Ready(kind));
            }

            let elapsed = started.elapsed();
            if elapsed >= self.classification_timeout {
                return Ok(Classification::TimedOut);
            }
            let remaining = self.classification_timeout - elapsed;
            tracing::debug!(
                remaining_secs = remaining.as_secs(),
                "File not readable yet, waiting"
            );
            tokio::time::sleep(self.classification_poll.min(remaining)).await;
        }
    }

    async fn mark_deleted(&self, item: &mut Item) -> Result<(), StageError> {
        tracing::warn!("File no longer exists");
        self.sink.transition(item, ProcessStatus::Deleted).await?;
        Ok(())
    }

    async fn render_preview(&self, item: &mut Item) -> Result<(), StageError> {
        let id = item.require_db_id()?;
        let directory = self.preview_directory.clone();
        let dest = preview_file(&directory, id);
        let source = item.local_file_path.clone();
        let kind = item.item_type;
        let renderer = Arc::clone(&self.preview);

        let rendered = blocking(move || -> Result<(), ProcessError> {
            std::fs::create_dir_all(&directory).map_err(|e| ProcessError::WriteFile {
                path: directory.clone(),
                source: e,
            })?;
            renderer.render(&source, kind, &dest)
        })
        .await;

        match rendered {
            Ok(Ok(())) => {
                let web_path = preview_web_path(&self.preview_url_prefix, id);
                item.preview_image_path = Some(PathBuf::from(&web_path));
                self.sink
                    .persist(item, ScannedDataUpdate::new().previewimage_path(web_path))
                    .await?;
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "Could not create preview image"),
            Err(e) => tracing::warn!(error = %e, "Preview renderer crashed"),
        }
        Ok(())
    }

    async fn read_page_count(&self, item: &mut Item) -> Result<(), StageError> {
        let source = item.local_file_path.clone();
        match blocking(move || inspector::page_count(&source)).await {
            Ok(Ok(pages)) => {
                tracing::info!(pages, "Pages to process");
                item.pdf_pages = pages;
                self.sink
                    .persist(item, ScannedDataUpdate::new().pdf_pages(pages))
                    .await?;
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "Could not read page count"),
            Err(e) => tracing::warn!(error = %e, "Page count reader crashed"),
        }
        Ok(())
    }
}

enum Classification {
    Ready(ItemType),
    Gone,
    TimedOut,
}

#[async_trait]
impl Stage for MetadataStage {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn queue(&self) -> &'static str {
        METADATA_QUEUE
    }

    fn queues(&self) -> &'static [&'static str] {
        &[METADATA_QUEUE, OCR_QUEUE]
    }

    async fn handle(&self, payload: &[u8], publisher: &dyn Publisher) -> Result<(), StageError> {
        let paths = MetadataRequest::parse(payload)?.into_paths();
        self.process(paths, publisher).await
    }
}
