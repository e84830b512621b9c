//! File-naming stage: asks an LLM backend for a descriptive name.
//!
//! Every outcome ends with the item on the upload queue. A failed or
//! skipped proposal only means the original name is kept; the reason is
//! recorded on the item's naming job.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::Instrument;

use super::{blocking, settle_failure, Stage, StageError};
use crate::broadcast::StatusSink;
use crate::config::NamingConfig;
use crate::db::naming_job_repo::{self, NamingJobOutcome};
use crate::db::scanned_repo::ScannedDataUpdate;
use crate::db::DatabaseError;
use crate::item::{FileNamingStatus, Item, ProcessStatus};
use crate::processor::inspector;
use crate::processor::naming::{self, FilenameBackend, NamingError};
use crate::sanitize::{redact_path, sanitize_filename};
use crate::settings::SettingsService;
use crate::transport::{forward, Publisher, FILE_NAMING_QUEUE, UPLOAD_QUEUE};

/// Where the stage gets its backend from for each message.
pub enum BackendSource {
    /// Built from the live settings, so changes apply to the next message.
    Settings {
        service: Arc<SettingsService>,
        config: NamingConfig,
    },
    Fixed(Arc<dyn FilenameBackend>),
}

#[derive(Error, Debug)]
enum ResolveError {
    #[error("Could not read settings: {0}")]
    Settings(#[from] DatabaseError),

    #[error(transparent)]
    Backend(#[from] NamingError),
}

impl ResolveError {
    fn status(&self) -> FileNamingStatus {
        match self {
            ResolveError::Settings(_) => FileNamingStatus::Failed,
            ResolveError::Backend(e) => e.status(),
        }
    }
}

impl BackendSource {
    fn resolve(&self) -> Result<Option<Arc<dyn FilenameBackend>>, ResolveError> {
        match self {
            BackendSource::Settings { service, config } => {
                let snapshot = service.get()?;
                let backend = naming::backend_for(&snapshot.settings.file_naming, config)?;
                Ok(backend.map(Arc::from))
            }
            BackendSource::Fixed(backend) => Ok(Some(Arc::clone(backend))),
        }
    }
}

/// Terminal job record for one naming attempt.
struct Outcome {
    status: FileNamingStatus,
    model: Option<String>,
    method: Option<&'static str>,
    error: Option<String>,
}

impl Outcome {
    fn new(status: FileNamingStatus) -> Self {
        Self {
            status,
            model: None,
            method: None,
            error: None,
        }
    }

    fn with_backend(mut self, backend: &dyn FilenameBackend) -> Self {
        self.model = Some(backend.model().to_string());
        self.method = Some(backend.method());
        self
    }

    fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

pub struct NamingStage {
    sink: StatusSink,
    backends: BackendSource,
}

impl NamingStage {
    pub fn new(sink: StatusSink, backends: BackendSource) -> Self {
        Self { sink, backends }
    }

    pub async fn process(&self, mut item: Item, publisher: &dyn Publisher) -> Result<(), StageError> {
        let id = item.require_db_id()?;
        let span = tracing::info_span!(
            "stage.naming",
            item_id = id,
            file = %redact_path(&item.local_file_path)
        );

        async move {
            let result = self.name_item(&mut item, publisher).await;
            if let Err(e) = &result {
                self.forward_unnamed(&mut item, publisher, e).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn name_item(&self, item: &mut Item, publisher: &dyn Publisher) -> Result<(), StageError> {
        let id = item.require_db_id()?;
        let job_id = naming_job_repo::insert(self.sink.db(), id)?;
        item.file_naming_job_id = Some(job_id);
        naming_job_repo::set_status(self.sink.db(), job_id, FileNamingStatus::Processing)?;
        item.file_naming_status = FileNamingStatus::Processing;
        self.sink.transition(item, ProcessStatus::Filename).await?;

        let previous_name = item.filename.clone();
        let outcome = self.propose(item).await?;
        naming_job_repo::finish(
            self.sink.db(),
            job_id,
            &NamingJobOutcome {
                status: outcome.status,
                model: outcome.model.as_deref(),
                method: outcome.method,
                error_description: outcome.error.as_deref(),
            },
        )?;
        match outcome.status {
            FileNamingStatus::Completed => {
                tracing::info!(file_name = %item.filename, "File renamed")
            }
            status => tracing::warn!(
                status = %status,
                reason = status.description(),
                "Keeping original file name"
            ),
        }

        item.file_naming_status = outcome.status;
        item.status = ProcessStatus::SyncPending;
        let mut update = ScannedDataUpdate::new();
        if item.filename != previous_name {
            update = update.file_name(item.filename.clone());
        }
        self.sink.persist(item, update).await?;

        let payload = item.to_payload()?;
        if !forward(publisher, UPLOAD_QUEUE, &payload).await {
            self.sink.transition(item, ProcessStatus::Failed).await?;
        }
        Ok(())
    }

    /// Sends the item on to upload after an internal error, under whatever
    /// name it has now. Every step here is best effort.
    async fn forward_unnamed(&self, item: &mut Item, publisher: &dyn Publisher, error: &StageError) {
        if item.status.is_terminal() {
            return;
        }
        tracing::error!(error = %error, "File naming stopped, forwarding to upload");

        item.file_naming_status = FileNamingStatus::Failed;
        if let Some(job_id) = item.file_naming_job_id {
            let description = error.to_string();
            let recorded = naming_job_repo::finish(
                self.sink.db(),
                job_id,
                &NamingJobOutcome {
                    status: FileNamingStatus::Failed,
                    model: None,
                    method: None,
                    error_description: Some(&description),
                },
            );
            if let Err(e) = recorded {
                tracing::error!(job_id, error = %e, "Could not record naming job failure");
            }
        }

        item.status = ProcessStatus::SyncPending;
        let update = ScannedDataUpdate::new().file_name(item.filename.clone());
        if let Err(e) = self.sink.persist(item, update).await {
            tracing::error!(error = %e, "Could not persist item before forwarding");
        }

        let forwarded = match item.to_payload() {
            Ok(payload) => forward(publisher, UPLOAD_QUEUE, &payload).await,
            Err(e) => {
                tracing::error!(error = %e, "Could not encode item");
                false
            }
        };
        if !forwarded {
            settle_failure(&self.sink, item, ProcessStatus::Failed, error).await;
        }
    }

    async fn propose(&self, item: &mut Item) -> Result<Outcome, StageError> {
        let ocr_file = item.ocr_file();
        if !ocr_file.exists() {
            return Ok(Outcome::new(FileNamingStatus::NoOcrFile));
        }

        let source = ocr_file.clone();
        let text = match blocking(move || inspector::first_page_text(&source)).await? {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => return Ok(Outcome::new(FileNamingStatus::NoPdfText)),
            Err(e) => return Ok(Outcome::new(FileNamingStatus::NoPdfText).with_error(e)),
        };

        let backend = match self.backends.resolve() {
            Ok(Some(backend)) => backend,
            Ok(None) => return Ok(Outcome::new(FileNamingStatus::Skipped)),
            Err(e) => return Ok(Outcome::new(e.status()).with_error(e)),
        };

        tracing::debug!(method = backend.method(), model = backend.model(), "Requesting file name");
        let proposed = match backend.propose(&text).await {
            Ok(proposed) => proposed,
            Err(e) => {
                return Ok(Outcome::new(e.status())
                    .with_backend(backend.as_ref())
                    .with_error(e))
            }
        };

        let stem = sanitize_filename(&proposed);
        let outcome = Outcome::new(FileNamingStatus::Completed).with_backend(backend.as_ref());
        if !ocr_file.exists() {
            return Ok(outcome);
        }
        match item.rename_working_file(&stem) {
            Ok(_) => Ok(outcome),
            Err(e) => Ok(Outcome::new(FileNamingStatus::Failed)
                .with_backend(backend.as_ref())
                .with_error(e)),
        }
    }
}

#[async_trait]
impl Stage for NamingStage {
    fn name(&self) -> &'static str {
        "naming"
    }

    fn queue(&self) -> &'static str {
        FILE_NAMING_QUEUE
    }

    fn queues(&self) -> &'static [&'static str] {
        &[FILE_NAMING_QUEUE, UPLOAD_QUEUE]
    }

    async fn handle(&self, payload: &[u8], publisher: &dyn Publisher) -> Result<(), StageError> {
        let item = Item::from_payload(payload)?;
        self.process(item, publisher).await
    }
}
