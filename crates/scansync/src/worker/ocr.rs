//! OCR stage: produces the searchable `_OCR.pdf` working file.
//!
//! OCR failures are recorded in `ocr_status` and never stop the item; the
//! upload stage decides what a missing working file means.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::Instrument;

use super::{settle_failure, Stage, StageError};
use crate::broadcast::StatusSink;
use crate::item::{Item, OcrStatus, ProcessStatus};
use crate::processor::OcrEngine;
use crate::sanitize::redact_path;
use crate::settings::SettingsService;
use crate::transport::{forward, Publisher, FILE_NAMING_QUEUE, OCR_QUEUE, UPLOAD_QUEUE};

pub struct OcrStage {
    sink: StatusSink,
    engine: Arc<dyn OcrEngine>,
    settings: Arc<SettingsService>,
}

impl OcrStage {
    pub fn new(sink: StatusSink, engine: Arc<dyn OcrEngine>, settings: Arc<SettingsService>) -> Self {
        Self {
            sink,
            engine,
            settings,
        }
    }

    pub async fn process(&self, mut item: Item, publisher: &dyn Publisher) -> Result<(), StageError> {
        let id = item.require_db_id()?;
        let span = tracing::info_span!(
            "stage.ocr",
            item_id = id,
            file = %redact_path(&item.local_file_path)
        );

        async move {
            let result = self.recognize(&mut item, publisher).await;
            if let Err(e) = &result {
                settle_failure(&self.sink, &mut item, ProcessStatus::Failed, e).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn recognize(&self, item: &mut Item, publisher: &dyn Publisher) -> Result<(), StageError> {
        item.ocr_status = OcrStatus::Processing;
        item.time_ocr_started = Some(Utc::now());
        self.sink.transition(item, ProcessStatus::Ocr).await?;

        let output = item.ocr_file();
        tracing::info!("Running OCR");
        item.ocr_status = match self.engine.run(&item.local_file_path, &output).await {
            Ok(()) => {
                tracing::info!("OCR finished");
                OcrStatus::Completed
            }
            Err(e) => {
                tracing::error!(error = %e, "OCR failed, continuing without text layer");
                e.status()
            }
        };
        item.time_ocr_finished = Some(Utc::now());

        let (status, queue) = if self.naming_enabled() {
            (ProcessStatus::FilenamePending, FILE_NAMING_QUEUE)
        } else {
            (ProcessStatus::SyncPending, UPLOAD_QUEUE)
        };
        self.sink.transition(item, status).await?;

        let payload = item.to_payload()?;
        if !forward(publisher, queue, &payload).await {
            self.sink.transition(item, ProcessStatus::Failed).await?;
        }
        Ok(())
    }

    fn naming_enabled(&self) -> bool {
        match self.settings.get() {
            Ok(snapshot) => snapshot.settings.file_naming.is_enabled(),
            Err(e) => {
                tracing::error!(error = %e, "Could not read settings, skipping file naming");
                false
            }
        }
    }
}

#[async_trait]
impl Stage for OcrStage {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn queue(&self) -> &'static str {
        OCR_QUEUE
    }

    fn queues(&self) -> &'static [&'static str] {
        &[OCR_QUEUE, FILE_NAMING_QUEUE, UPLOAD_QUEUE]
    }

    async fn handle(&self, payload: &[u8], publisher: &dyn Publisher) -> Result<(), StageError> {
        let item = Item::from_payload(payload)?;
        self.process(item, publisher).await
    }
}
