//! Chunked media upload
//!
//! Providers expose different upload protocols. Each one implements
//! [`UploadAdapter`], a four-step contract:
//!
//! 1. `begin_upload` opens a session and returns a handle
//! 2. `send_chunk` is called once per byte range, strictly in order
//! 3. `finalize` is called only after every byte is acknowledged
//! 4. `poll_status` is consulted while the provider is still processing
//!
//! [`ChunkedUploader`] drives any adapter through that contract. It owns
//! the [`UploadSession`] (which byte offset has been acknowledged), retries
//! each step independently through a [`RetryPolicy`], and never re-sends
//! bytes the provider has already acknowledged.
//!
//! Two adapters ship with the crate:
//!
//! - [`command_phase::CommandPhaseAdapter`]: INIT / APPEND / FINALIZE / STATUS
//!   commands against a single endpoint
//! - [`presigned::PresignedUrlAdapter`]: an initialize call returns a one-time
//!   URL that receives `PUT` requests carrying `Content-Range`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::credentials::ProviderCredential;
use crate::error::ProviderError;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::{MediaAsset, MediaKind};

pub mod command_phase;
pub mod presigned;

// Mock adapter is available for all builds to support integration tests
pub mod mock;

pub type UploadResult<T> = std::result::Result<T, ProviderError>;

/// What an adapter needs to know about the file being uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMeta {
    pub asset_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub kind: MediaKind,
}

impl AssetMeta {
    pub fn from_asset(asset: &MediaAsset) -> UploadResult<Self> {
        let kind = asset.kind().ok_or_else(|| {
            ProviderError::UnsupportedMedia(format!(
                "{} has unsupported type {}",
                asset.file_name, asset.mime_type
            ))
        })?;
        Ok(Self {
            asset_id: asset.id.clone(),
            file_name: asset.file_name.clone(),
            mime_type: asset.mime_type.clone(),
            size_bytes: asset.size_bytes,
            kind,
        })
    }
}

/// Provider-side identity of an open upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Media id / asset URN assigned by the provider
    pub media_id: String,
    /// One-time upload URL, for pre-signed protocols
    pub upload_url: Option<String>,
}

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// `Content-Range` header value, e.g. `bytes 0-1023/4096`
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end.saturating_sub(1), total)
    }
}

/// Provider acknowledgement of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAck {
    /// First byte the provider has not yet received
    pub next_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingState {
    Ready,
    Processing { check_after: Option<Duration> },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub media_id: String,
    pub processing: ProcessingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Init,
    Append,
    Finalize,
    Status,
    Complete,
}

/// State of one upload attempt. Lives only for the duration of
/// [`ChunkedUploader::upload`].
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub provider: String,
    pub asset: AssetMeta,
    pub handle: SessionHandle,
    pub chunk_size: u64,
    pub bytes_acknowledged: u64,
    /// Number of chunks acknowledged so far (APPEND segment index)
    pub chunks_acknowledged: u32,
    pub phase: UploadPhase,
}

impl UploadSession {
    pub fn total_bytes(&self) -> u64 {
        self.asset.size_bytes
    }

    pub fn is_fully_acknowledged(&self) -> bool {
        self.bytes_acknowledged >= self.total_bytes()
    }

    /// Next range to send, starting at the first unacknowledged byte
    pub fn next_range(&self) -> Option<ByteRange> {
        if self.is_fully_acknowledged() {
            return None;
        }
        let start = self.bytes_acknowledged;
        let end = (start + self.chunk_size).min(self.total_bytes());
        Some(ByteRange { start, end })
    }

    /// Apply an acknowledgement for `range`. The offset may not move
    /// backwards or past what was sent.
    fn acknowledge(&mut self, range: ByteRange, ack: ChunkAck) -> UploadResult<()> {
        if ack.next_offset < self.bytes_acknowledged || ack.next_offset > range.end {
            return Err(ProviderError::Rejected(format!(
                "provider acknowledged offset {} for range {}-{}",
                ack.next_offset, range.start, range.end
            )));
        }
        if ack.next_offset == range.end {
            self.chunks_acknowledged += 1;
        }
        self.bytes_acknowledged = ack.next_offset;
        Ok(())
    }
}

#[async_trait]
pub trait UploadAdapter: Send + Sync {
    /// Open an upload session
    async fn begin_upload(
        &self,
        credential: &ProviderCredential,
        asset: &AssetMeta,
    ) -> UploadResult<SessionHandle>;

    /// Send one byte range. Returns how far the provider has received.
    async fn send_chunk(
        &self,
        credential: &ProviderCredential,
        session: &UploadSession,
        range: ByteRange,
        bytes: Bytes,
    ) -> UploadResult<ChunkAck>;

    /// Close the session once all bytes are acknowledged
    async fn finalize(
        &self,
        credential: &ProviderCredential,
        session: &UploadSession,
    ) -> UploadResult<FinalizeOutcome>;

    /// Check asynchronous processing (e.g. video transcoding)
    async fn poll_status(
        &self,
        credential: &ProviderCredential,
        media_id: &str,
    ) -> UploadResult<ProcessingState>;
}

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub media_id: String,
    pub bytes_acknowledged: u64,
    pub chunks: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct UploadSettings {
    pub chunk_size: u64,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl From<&crate::config::UploadConfig> for UploadSettings {
    fn from(config: &crate::config::UploadConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes as u64,
            poll_interval: config.status_poll_interval(),
            max_polls: config.status_max_polls,
        }
    }
}

/// Drives an [`UploadAdapter`] through a full upload
#[derive(Clone)]
pub struct ChunkedUploader {
    provider: String,
    adapter: Arc<dyn UploadAdapter>,
    policy: Arc<dyn RetryPolicy>,
    settings: UploadSettings,
}

impl ChunkedUploader {
    pub fn new(
        provider: impl Into<String>,
        adapter: Arc<dyn UploadAdapter>,
        policy: Arc<dyn RetryPolicy>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            provider: provider.into(),
            adapter,
            policy,
            settings,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Upload `data` (the full contents of `asset`)
    pub async fn upload(
        &self,
        credential: &ProviderCredential,
        asset: &AssetMeta,
        data: Bytes,
    ) -> UploadResult<UploadedMedia> {
        if data.len() as u64 != asset.size_bytes {
            return Err(ProviderError::Rejected(format!(
                "{} is {} bytes but {} were read",
                asset.file_name,
                asset.size_bytes,
                data.len()
            )));
        }

        let handle = self
            .with_retry("init", || self.adapter.begin_upload(credential, asset))
            .await?;

        let mut session = UploadSession {
            provider: self.provider.clone(),
            asset: asset.clone(),
            handle,
            chunk_size: self.settings.chunk_size.max(1),
            bytes_acknowledged: 0,
            chunks_acknowledged: 0,
            phase: UploadPhase::Append,
        };

        while let Some(range) = session.next_range() {
            let chunk = data.slice(range.start as usize..range.end as usize);
            let ack = self
                .with_retry("append", || {
                    self.send_checked(credential, &session, range, chunk.clone())
                })
                .await?;
            session.acknowledge(range, ack)?;

            tracing::debug!(
                provider = %self.provider,
                media_id = %session.handle.media_id,
                acknowledged = session.bytes_acknowledged,
                total = session.total_bytes(),
                "Chunk acknowledged"
            );
        }

        session.phase = UploadPhase::Finalize;
        let finalized = self
            .with_retry("finalize", || self.adapter.finalize(credential, &session))
            .await?;

        session.phase = UploadPhase::Status;
        self.await_processing(credential, &finalized.media_id, finalized.processing)
            .await?;
        session.phase = UploadPhase::Complete;

        tracing::info!(
            provider = %self.provider,
            media_id = %finalized.media_id,
            bytes = session.bytes_acknowledged,
            chunks = session.chunks_acknowledged,
            "Media upload complete"
        );

        Ok(UploadedMedia {
            media_id: finalized.media_id,
            bytes_acknowledged: session.bytes_acknowledged,
            chunks: session.chunks_acknowledged,
        })
    }

    /// Send a chunk; an acknowledgement without progress counts as a
    /// transient failure so the retry ceiling still applies.
    async fn send_checked(
        &self,
        credential: &ProviderCredential,
        session: &UploadSession,
        range: ByteRange,
        bytes: Bytes,
    ) -> UploadResult<ChunkAck> {
        let ack = self
            .adapter
            .send_chunk(credential, session, range, bytes)
            .await?;
        if ack.next_offset <= range.start && !range.is_empty() {
            return Err(ProviderError::Network(format!(
                "no bytes of range {}-{} were acknowledged",
                range.start, range.end
            )));
        }
        Ok(ack)
    }

    async fn await_processing(
        &self,
        credential: &ProviderCredential,
        media_id: &str,
        mut state: ProcessingState,
    ) -> UploadResult<()> {
        let mut polls = 0u32;
        loop {
            match state {
                ProcessingState::Ready => return Ok(()),
                ProcessingState::Failed(reason) => {
                    return Err(ProviderError::ProcessingFailed(reason))
                }
                ProcessingState::Processing { check_after } => {
                    if polls >= self.settings.max_polls {
                        return Err(ProviderError::ProcessingTimeout(format!(
                            "{} still processing after {} status checks",
                            media_id, polls
                        )));
                    }
                    let wait = check_after.unwrap_or(self.settings.poll_interval);
                    tokio::time::sleep(wait).await;
                    polls += 1;
                    state = self
                        .with_retry("status", || self.adapter.poll_status(credential, media_id))
                        .await?;
                }
            }
        }
    }

    /// Run one protocol step, retrying per the policy
    async fn with_retry<T, F, Fut>(&self, step: &str, mut op: F) -> UploadResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = UploadResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match self.policy.decide(attempt, e.class()) {
                    RetryDecision::RetryAfter(delay) => {
                        tracing::warn!(
                            provider = %self.provider,
                            step = step,
                            attempt = attempt,
                            error = %e,
                            "Upload step failed, retrying in {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::Stop => {
                        tracing::warn!(
                            provider = %self.provider,
                            step = step,
                            attempt = attempt,
                            error = %e,
                            "Upload step failed"
                        );
                        return Err(e);
                    }
                },
            }
        }
    }
}
