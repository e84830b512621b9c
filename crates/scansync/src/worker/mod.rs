//! Pipeline stages.
//!
//! [`scanner::DirectoryScanner`] feeds the metadata queue. Every other stage
//! implements [`Stage`] and is driven by [`crate::transport::Supervisor`],
//! which hands it one message at a time and acknowledges the message once
//! `handle` returned, whatever the outcome.

pub mod filter;
pub mod metadata;
pub mod naming;
pub mod ocr;
pub mod scanner;
pub mod upload;

use async_trait::async_trait;
use thiserror::Error;

use crate::broadcast::{SinkError, StatusSink};
use crate::db::DatabaseError;
use crate::error::{ItemError, StorageError};
use crate::item::{Item, ProcessStatus};
use crate::transport::{Publisher, TransportError};

pub use filter::{PathFilter, Rejection};
pub use metadata::MetadataStage;
pub use naming::NamingStage;
pub use ocr::OcrStage;
pub use scanner::{DetectionMessage, DirectoryScanner};
pub use upload::UploadStage;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Invalid message payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error("Status update failed: {0}")]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// One consuming pipeline step.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Queue this stage consumes from.
    fn queue(&self) -> &'static str;

    /// Every queue the stage touches; declared when connecting.
    fn queues(&self) -> &'static [&'static str];

    /// Processes one message. Errors are logged by the caller and the message
    /// is acknowledged regardless, so the item's persisted status must already
    /// reflect any failure; see [`settle_failure`].
    async fn handle(&self, payload: &[u8], publisher: &dyn Publisher) -> Result<(), StageError>;
}

/// Runs blocking file work off the async executor.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, StageError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StageError::Task(e.to_string()))
}

/// Records `status` for an item whose handler stopped with `error`.
///
/// Items that already reached a terminal status are left alone. Returns
/// whether the item was still in flight.
pub(crate) async fn settle_failure(
    sink: &StatusSink,
    item: &mut Item,
    status: ProcessStatus,
    error: &StageError,
) -> bool {
    if item.status.is_terminal() {
        return false;
    }
    tracing::error!(error = %error, status = %status, "Processing stopped, marking item");
    if let Err(e) = sink.transition(item, status).await {
        tracing::error!(error = %e, "Could not record failure status");
    }
    true
}
