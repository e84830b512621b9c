//! Status sink: persist an item change, then announce it.

use std::sync::Arc;

use thiserror::Error;

use super::item_updates::{ItemNotification, UpdateNotifier};
use crate::db::scanned_repo::{self, ScannedDataUpdate};
use crate::db::{Database, DatabaseError};
use crate::error::ItemError;
use crate::item::{Item, ProcessStatus};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Clone)]
pub struct StatusSink {
    db: Database,
    notifier: Arc<dyn UpdateNotifier>,
}

impl StatusSink {
    pub fn new(db: Database, notifier: Arc<dyn UpdateNotifier>) -> Self {
        Self { db, notifier }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Writes `update` plus the item's status, OCR status and upload
    /// progress in one statement, then notifies subscribers.
    ///
    /// The item is the source of truth for the status fields, so any
    /// status set on `update` is replaced by the item's.
    pub async fn persist(&self, item: &Item, update: ScannedDataUpdate) -> Result<(), SinkError> {
        let id = item.require_db_id()?;
        let update = update
            .status(item.status)
            .ocr_status(item.ocr_status)
            .upload_progress(item.current_uploading, item.current_upload_target.clone());

        scanned_repo::update(&self.db, id, &update)?;
        tracing::debug!(item_id = id, status = %item.status, "Persisted item status");

        self.notifier
            .notify(&ItemNotification::from_item(id, item))
            .await;
        Ok(())
    }

    /// Sets the item's status and persists it. On error the item keeps its
    /// previous status.
    pub async fn transition(&self, item: &mut Item, status: ProcessStatus) -> Result<(), SinkError> {
        let previous = std::mem::replace(&mut item.status, status);
        let result = self.persist(item, ScannedDataUpdate::new()).await;
        if result.is_err() {
            item.status = previous;
        }
        result
    }
}
