//! Upload of processed documents to remote storage (Microsoft Graph drives).
//!
//! Files up to the small-upload limit go up in a single `PUT`. Larger files
//! use an upload session: the session URL is created once and the file is
//! streamed in fixed-size chunks, each retried on its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::Instrument;

use crate::config::UploadConfig;
use crate::item::RemoteDestination;
use crate::retry::{RetryError, RetryPolicy};

const CONFLICT_BEHAVIOR: &str = "@microsoft.graph.conflictBehavior=rename";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote storage returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request to remote storage failed: {0}")]
    Transport(String),

    #[error("Upload session response carried no upload URL")]
    MissingUploadUrl,

    #[error("Invalid remote storage URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl UploadError {
    /// Transport failures, throttling and server errors are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transport(_) => true,
            UploadError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// What the remote side reported for a finished upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedFile {
    /// Name the file ended up with; differs from the requested one after a
    /// conflict rename.
    pub name: Option<String>,
    pub web_url: Option<String>,
}

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Uploads `local` as `name` into the destination folder.
    async fn upload(
        &self,
        local: &Path,
        name: &str,
        destination: &RemoteDestination,
    ) -> Result<UploadedFile, UploadError>;
}

#[derive(Deserialize)]
struct DriveItem {
    name: Option<String>,
    #[serde(rename = "webUrl")]
    web_url: Option<String>,
}

#[derive(Deserialize)]
struct UploadSession {
    #[serde(rename = "uploadUrl")]
    upload_url: Option<String>,
}

pub struct GraphStorage {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
    small_upload_limit: u64,
    chunk_size: u64,
    chunk_policy: RetryPolicy,
}

impl GraphStorage {
    /// Chunks are retried with exponential backoff (1s to 8s).
    pub fn new(config: &UploadConfig, token: SecretString) -> Result<Self, UploadError> {
        let policy = RetryPolicy::exponential(
            config.chunk_attempts,
            Duration::from_secs(1),
            Duration::from_secs(8),
        );
        Self::with_policy(config, token, policy)
    }

    pub fn with_policy(
        config: &UploadConfig,
        token: SecretString,
        chunk_policy: RetryPolicy,
    ) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| UploadError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            token,
            small_upload_limit: config.small_upload_limit_bytes,
            chunk_size: config.chunk_size_bytes.max(1),
            chunk_policy,
        })
    }

    async fn upload_small(
        &self,
        local: &Path,
        name: &str,
        destination: &RemoteDestination,
    ) -> Result<UploadedFile, UploadError> {
        let url = item_url(&self.base_url, destination, name, "content")?;
        let body = tokio::fs::read(local).await.map_err(|e| UploadError::Read {
            path: local.to_path_buf(),
            source: e,
        })?;

        let response = self
            .client
            .put(url)
            .bearer_auth(self.token.expose_secret())
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(parse_drive_item(&body)),
            _ => Err(http_error(status, &body)),
        }
    }

    async fn create_session(
        &self,
        name: &str,
        destination: &RemoteDestination,
    ) -> Result<String, UploadError> {
        let url = item_url(&self.base_url, destination, name, "createUploadSession")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(&serde_json::json!({
                "item": { "@microsoft.graph.conflictBehavior": "rename" }
            }))
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        if status != StatusCode::OK {
            return Err(http_error(status, &body));
        }
        serde_json::from_str::<UploadSession>(&body)
            .ok()
            .and_then(|s| s.upload_url)
            .ok_or(UploadError::MissingUploadUrl)
    }

    async fn put_chunk(
        &self,
        upload_url: &str,
        chunk: &[u8],
        range: ChunkRange,
        total: u64,
    ) -> Result<Option<UploadedFile>, UploadError> {
        let response = self
            .client
            .put(upload_url)
            .header(reqwest::header::CONTENT_RANGE, range.header(total))
            .body(chunk.to_vec())
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        match status {
            StatusCode::ACCEPTED => Ok(None),
            StatusCode::OK | StatusCode::CREATED => Ok(Some(parse_drive_item(&body))),
            _ => Err(http_error(status, &body)),
        }
    }

    async fn upload_chunked(
        &self,
        local: &Path,
        size: u64,
        name: &str,
        destination: &RemoteDestination,
    ) -> Result<UploadedFile, UploadError> {
        let upload_url = self.create_session(name, destination).await?;
        let read_error = |e: std::io::Error| UploadError::Read {
            path: local.to_path_buf(),
            source: e,
        };
        let mut file = tokio::fs::File::open(local).await.map_err(read_error)?;

        let mut finished = None;
        for range in chunk_ranges(size, self.chunk_size) {
            let mut chunk = vec![0u8; range.size() as usize];
            file.read_exact(&mut chunk).await.map_err(read_error)?;

            tracing::debug!(
                start = range.start,
                end = range.end,
                total = size,
                "Uploading chunk"
            );
            finished = self
                .chunk_policy
                .run(
                    "upload.chunk",
                    |_| self.put_chunk(&upload_url, &chunk, range, size),
                    UploadError::is_retryable,
                )
                .await
                .map_err(RetryError::into_inner)?;
        }

        Ok(finished.unwrap_or_default())
    }
}

#[async_trait]
impl RemoteStorage for GraphStorage {
    async fn upload(
        &self,
        local: &Path,
        name: &str,
        destination: &RemoteDestination,
    ) -> Result<UploadedFile, UploadError> {
        let size = tokio::fs::metadata(local)
            .await
            .map_err(|e| UploadError::Read {
                path: local.to_path_buf(),
                source: e,
            })?
            .len();

        let span = tracing::info_span!(
            "storage.upload",
            remote_path = %destination.remote_path,
            bytes = size
        );
        async {
            if size <= self.small_upload_limit {
                self.upload_small(local, name, destination).await
            } else {
                self.upload_chunked(local, size, name, destination).await
            }
        }
        .instrument(span)
        .await
    }
}

/// Inclusive byte range of one upload chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value.
    pub fn header(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Splits `total` bytes into consecutive chunks of at most `chunk_size`.
pub fn chunk_ranges(total: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk_size).min(total) - 1;
        ranges.push(ChunkRange { start, end });
        start = end + 1;
    }
    ranges
}

/// `{base}/drives/{drive}/items/{folder}:/{name}:/{action}`.
pub fn item_url(
    base: &str,
    destination: &RemoteDestination,
    name: &str,
    action: &str,
) -> Result<Url, UploadError> {
    let mut url = Url::parse(base).map_err(|e| UploadError::InvalidUrl(e.to_string()))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| UploadError::InvalidUrl(base.to_string()))?;
        segments
            .pop_if_empty()
            .push("drives")
            .push(&destination.drive_id)
            .push("items")
            .push(&format!("{}:", destination.folder_id))
            .push(&format!("{}:", name))
            .push(action);
    }
    if action == "content" {
        url.set_query(Some(CONFLICT_BEHAVIOR));
    }
    Ok(url)
}

fn parse_drive_item(body: &str) -> UploadedFile {
    match serde_json::from_str::<DriveItem>(body) {
        Ok(item) => UploadedFile {
            name: item.name,
            web_url: item.web_url,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Upload succeeded but the response was not a drive item");
            UploadedFile::default()
        }
    }
}

fn http_error(status: StatusCode, body: &str) -> UploadError {
    UploadError::Http {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    }
}
