//! Live item updates for dashboards.
//!
//! Updates are a convenience: the persisted row stays authoritative, so a
//! lost notification is logged and otherwise ignored.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::item::{Item, ProcessStatus};
use crate::transport::amqp::FanoutPublisher;
use crate::transport::UPDATES_EXCHANGE;

/// Attempts per notification on the fan-out connection.
const FANOUT_ATTEMPTS: u32 = 3;

/// Snapshot of an item right after a persisted change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemNotification {
    pub id: i64,
    pub file_name: String,
    pub file_status: String,
    pub status_code: i32,
    pub ocr_status: i32,
    pub pdf_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previewimage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    pub current_uploading: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_upload_target: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ItemNotification {
    pub fn from_item(id: i64, item: &Item) -> Self {
        Self {
            id,
            file_name: item.filename.clone(),
            file_status: item.status.as_str().to_string(),
            status_code: item.status.progress_code(),
            ocr_status: item.ocr_status.code(),
            pdf_pages: item.pdf_pages,
            previewimage_path: item
                .preview_image_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            web_url: item.web_url.clone(),
            current_uploading: item.current_uploading,
            current_upload_target: item.current_upload_target.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Parsed lifecycle status, if the label is known.
    pub fn status(&self) -> Option<ProcessStatus> {
        self.file_status.parse().ok()
    }
}

/// Receives every persisted item change.
#[async_trait]
pub trait UpdateNotifier: Send + Sync {
    async fn notify(&self, notification: &ItemNotification);
}

/// In-process fan-out of item updates.
#[derive(Clone)]
pub struct ItemUpdateBroadcaster {
    sender: Arc<broadcast::Sender<ItemNotification>>,
}

impl ItemUpdateBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, notification: ItemNotification) {
        // No subscribers is fine.
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ItemNotification> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ItemUpdateBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl UpdateNotifier for ItemUpdateBroadcaster {
    async fn notify(&self, notification: &ItemNotification) {
        self.send(notification.clone());
    }
}

/// Publishes updates to the `sse_updates_fanout` exchange.
pub struct FanoutNotifier {
    publisher: FanoutPublisher,
}

impl FanoutNotifier {
    pub fn new(url: &str, heartbeat_secs: u16) -> Self {
        Self {
            publisher: FanoutPublisher::new(url, heartbeat_secs, UPDATES_EXCHANGE),
        }
    }
}

#[async_trait]
impl UpdateNotifier for FanoutNotifier {
    async fn notify(&self, notification: &ItemNotification) {
        let payload = match serde_json::to_vec(notification) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Could not encode item update");
                return;
            }
        };
        if let Err(e) = self.publisher.publish(&payload, FANOUT_ATTEMPTS).await {
            tracing::warn!(item_id = notification.id, error = %e, "Dropped item update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_item(dir: &TempDir) -> Item {
        let folder = dir.path().join("Finance");
        std::fs::create_dir_all(&folder).unwrap();
        let path = folder.join("scan.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        Item::new(path).unwrap()
    }

    #[test]
    fn test_notification_from_item() {
        let dir = TempDir::new().unwrap();
        let mut item = sample_item(&dir);
        item.status = ProcessStatus::Sync;
        item.current_uploading = 1;
        item.current_upload_target = Some("/Documents/Finance".into());

        let notification = ItemNotification::from_item(12, &item);
        assert_eq!(notification.id, 12);
        assert_eq!(notification.file_status, "Syncing");
        assert_eq!(notification.status_code, 4);
        assert_eq!(notification.status(), Some(ProcessStatus::Sync));

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["current_upload_target"], "/Documents/Finance");
        assert!(json.get("web_url").is_none());
    }

    #[tokio::test]
    async fn test_broadcaster_delivers_to_subscribers() {
        let dir = TempDir::new().unwrap();
        let item = sample_item(&dir);
        let broadcaster = ItemUpdateBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.receiver_count(), 1);

        broadcaster
            .notify(&ItemNotification::from_item(1, &item))
            .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, 1);
        assert_eq!(received.file_name, "scan.pdf");
    }

    #[test]
    fn test_send_without_subscribers() {
        let dir = TempDir::new().unwrap();
        let item = sample_item(&dir);
        let broadcaster = ItemUpdateBroadcaster::new(4);
        broadcaster.send(ItemNotification::from_item(1, &item));
    }
}
