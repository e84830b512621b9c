//! Watch-root scanner: detects new files and announces them in content groups.
//!
//! Every tick the watch root is enumerated recursively and compared with the
//! previous tick. New paths collect in a pending buffer until no further path
//! arrived for the debounce window; then the buffer is hashed and each group
//! of identical content becomes one message on the metadata queue.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::filter::PathFilter;
use super::StageError;
use crate::config::{BrokerConfig, Config};
use crate::error::ScanSyncError;
use crate::sanitize::redact_path;
use crate::transport::{connect, Broker, Session, METADATA_QUEUE};

/// One group of newly detected paths with identical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionMessage {
    pub file_paths: Vec<PathBuf>,
    pub file_hash: String,
    pub is_duplicate_group: bool,
}

pub struct DirectoryScanner {
    watch_root: PathBuf,
    filter: PathFilter,
    debounce: Duration,
    hash_chunk_bytes: usize,
    known: HashSet<PathBuf>,
    pending: Vec<PathBuf>,
    last_arrival: Option<Instant>,
}

impl DirectoryScanner {
    /// Creates a scanner that treats everything currently present as known.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        watch_root: P,
        failed_directory: Q,
        debounce: Duration,
        hash_chunk_bytes: usize,
    ) -> Result<Self, ScanSyncError> {
        let watch_root = watch_root.as_ref().to_path_buf();
        if !watch_root.is_dir() {
            return Err(ScanSyncError::WatchDirectoryMissing(watch_root));
        }

        let mut scanner = Self {
            watch_root,
            filter: PathFilter::new(failed_directory),
            debounce,
            hash_chunk_bytes: hash_chunk_bytes.max(1),
            known: HashSet::new(),
            pending: Vec::new(),
            last_arrival: None,
        };
        scanner.known = scanner.enumerate();
        tracing::info!(files = scanner.known.len(), "Initial scan complete");
        Ok(scanner)
    }

    pub fn from_config(config: &Config) -> Result<Self, ScanSyncError> {
        Self::new(
            &config.watch_directory,
            config.failed_path(),
            Duration::from_secs(config.detection.debounce_secs),
            config.detection.hash_chunk_bytes,
        )
    }

    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    /// Every ingestible file below the watch root.
    pub fn enumerate(&self) -> HashSet<PathBuf> {
        WalkDir::new(&self.watch_root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !self.filter.in_failed_area(entry.path()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| !entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .filter(|path| self.filter.admit(path))
            .collect()
    }

    /// Runs one poll cycle and returns the groups that are ready to publish.
    pub fn tick(&mut self, now: Instant) -> Vec<DetectionMessage> {
        let current = self.enumerate();

        let mut arrived: Vec<PathBuf> = current
            .difference(&self.known)
            .filter(|path| !self.pending.contains(path))
            .cloned()
            .collect();
        arrived.sort();
        self.known = current;

        if !arrived.is_empty() {
            for path in &arrived {
                tracing::info!(file = %redact_path(path), "Found new file");
            }
            self.pending.extend(arrived);
            self.last_arrival = Some(now);
        }

        match self.last_arrival {
            Some(last) if !self.pending.is_empty() && now.duration_since(last) >= self.debounce => {
                self.last_arrival = None;
                let pending = std::mem::take(&mut self.pending);
                group_by_content(&pending, self.hash_chunk_bytes)
            }
            _ => Vec::new(),
        }
    }

    /// Puts the paths of a message that could not be published back into
    /// the pending buffer.
    pub fn requeue(&mut self, message: DetectionMessage, now: Instant) {
        for path in message.file_paths {
            if !self.pending.contains(&path) {
                self.pending.push(path);
            }
        }
        self.last_arrival = Some(now);
    }

    /// Polls until cancelled, publishing every group to the metadata queue.
    ///
    /// The first broker connection must succeed within the connect policy;
    /// later losses are retried on the next tick.
    pub async fn run(
        self,
        broker: Arc<dyn Broker>,
        broker_config: &BrokerConfig,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<(), StageError> {
        let policy = broker_config.connect_policy();
        let mut session: Option<Box<dyn Session>> =
            Some(connect(broker.as_ref(), &[METADATA_QUEUE], &policy).await?);
        tracing::info!(interval_ms = poll_interval.as_millis() as u64, "Scanning for new files");

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut scanner = self;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !session.as_ref().map(|s| s.is_connected()).unwrap_or(false) {
                session = match connect(broker.as_ref(), &[METADATA_QUEUE], &policy).await {
                    Ok(s) => Some(s),
                    Err(e) => {
                        tracing::warn!(error = %e, "Broker unavailable, retrying next tick");
                        None
                    }
                };
            }

            let now = Instant::now();
            let (returned, messages) = tokio::task::spawn_blocking(move || {
                let messages = scanner.tick(now);
                (scanner, messages)
            })
            .await
            .map_err(|e| StageError::Task(e.to_string()))?;
            scanner = returned;

            for message in messages {
                let published = match &session {
                    Some(s) => publish(s.as_ref(), &message).await,
                    None => false,
                };
                if !published {
                    session = None;
                    scanner.requeue(message, now);
                }
            }
        }

        if let Some(session) = session {
            session.close().await;
        }
        tracing::info!("Scanner stopped");
        Ok(())
    }
}

async fn publish(session: &dyn Session, message: &DetectionMessage) -> bool {
    let payload = match serde_json::to_vec(message) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode detection message");
            return false;
        }
    };
    let published = crate::transport::forward(session.as_publisher(), METADATA_QUEUE, &payload).await;
    if published {
        tracing::info!(
            files = message.file_paths.len(),
            duplicate = message.is_duplicate_group,
            hash = %message.file_hash,
            "Published file group"
        );
    }
    published
}

/// Hashes `paths` and buckets them by digest, keeping first-seen order.
/// Files that cannot be hashed are left out.
pub fn group_by_content(paths: &[PathBuf], chunk_bytes: usize) -> Vec<DetectionMessage> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<PathBuf>> = HashMap::new();

    for path in paths {
        match hash_file(path, chunk_bytes) {
            Ok(digest) => {
                if !buckets.contains_key(&digest) {
                    order.push(digest.clone());
                }
                buckets.entry(digest).or_default().push(path.clone());
            }
            Err(e) => {
                tracing::warn!(file = %redact_path(path), error = %e, "Could not hash file, skipping");
            }
        }
    }

    order
        .into_iter()
        .filter_map(|digest| {
            let file_paths = buckets.remove(&digest)?;
            Some(DetectionMessage {
                is_duplicate_group: file_paths.len() > 1,
                file_paths,
                file_hash: digest,
            })
        })
        .collect()
}

/// Hex SHA-256 of a file, read in chunks of `chunk_bytes`.
pub fn hash_file(path: &Path, chunk_bytes: usize) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_bytes.max(1)];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
