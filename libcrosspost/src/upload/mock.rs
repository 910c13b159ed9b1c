//! Scriptable upload adapter for tests
//!
//! Records every call and every byte range it receives, and can be told to
//! fail specific chunks, acknowledge a chunk only partially, or report a
//! sequence of processing states.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    AssetMeta, ByteRange, ChunkAck, FinalizeOutcome, ProcessingState, SessionHandle,
    UploadAdapter, UploadResult, UploadSession,
};
use crate::credentials::ProviderCredential;
use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadCall {
    Begin,
    Chunk(ByteRange),
    Finalize,
    Status,
}

#[derive(Default)]
struct MockState {
    calls: Vec<UploadCall>,
    received: Vec<u8>,
    sessions: u32,
    /// chunk index -> (remaining failures, error)
    chunk_failures: HashMap<u32, (u32, ProviderError)>,
    /// chunk index -> absolute offset to acknowledge instead of the range end
    partial_acks: HashMap<u32, u64>,
    begin_failures: VecDeque<ProviderError>,
    processing: VecDeque<ProcessingState>,
}

#[derive(Default)]
pub struct MockUploadAdapter {
    state: Mutex<MockState>,
}

impl MockUploadAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the chunk with index `chunk` `times` times before accepting it
    pub fn fail_chunk(&self, chunk: u32, times: u32, error: ProviderError) {
        self.lock().chunk_failures.insert(chunk, (times, error));
    }

    /// Acknowledge only up to `offset` the first time chunk `chunk` is sent
    pub fn partial_ack_on_chunk(&self, chunk: u32, offset: u64) {
        self.lock().partial_acks.insert(chunk, offset);
    }

    /// Make the next `begin_upload` calls fail, in order
    pub fn fail_begin(&self, errors: Vec<ProviderError>) {
        self.lock().begin_failures.extend(errors);
    }

    /// States returned by `finalize` and then each `poll_status`
    pub fn set_processing(&self, states: Vec<ProcessingState>) {
        self.lock().processing = states.into();
    }

    pub fn calls(&self) -> Vec<UploadCall> {
        self.lock().calls.clone()
    }

    pub fn sent_ranges(&self) -> Vec<ByteRange> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                UploadCall::Chunk(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Bytes the "provider" holds, in offset order
    pub fn received_bytes(&self) -> Vec<u8> {
        self.lock().received.clone()
    }

    pub fn sessions_opened(&self) -> u32 {
        self.lock().sessions
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A poisoned lock only happens after a test already panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_processing(&self) -> ProcessingState {
        self.lock()
            .processing
            .pop_front()
            .unwrap_or(ProcessingState::Ready)
    }
}

#[async_trait]
impl UploadAdapter for MockUploadAdapter {
    async fn begin_upload(
        &self,
        _credential: &ProviderCredential,
        asset: &AssetMeta,
    ) -> UploadResult<SessionHandle> {
        let mut state = self.lock();
        state.calls.push(UploadCall::Begin);
        if let Some(error) = state.begin_failures.pop_front() {
            return Err(error);
        }
        state.sessions += 1;
        state.received.clear();
        Ok(SessionHandle {
            media_id: format!("mock-media-{}-{}", asset.asset_id, state.sessions),
            upload_url: None,
        })
    }

    async fn send_chunk(
        &self,
        _credential: &ProviderCredential,
        session: &UploadSession,
        range: ByteRange,
        bytes: Bytes,
    ) -> UploadResult<ChunkAck> {
        let mut state = self.lock();
        state.calls.push(UploadCall::Chunk(range));

        let index = session.chunks_acknowledged;
        if let Some((remaining, error)) = state.chunk_failures.get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }

        let next_offset = state
            .partial_acks
            .remove(&index)
            .unwrap_or(range.end)
            .clamp(range.start, range.end);

        let keep = (next_offset - range.start) as usize;
        state.received.truncate(range.start as usize);
        state.received.extend_from_slice(&bytes[..keep]);

        Ok(ChunkAck { next_offset })
    }

    async fn finalize(
        &self,
        _credential: &ProviderCredential,
        session: &UploadSession,
    ) -> UploadResult<FinalizeOutcome> {
        self.lock().calls.push(UploadCall::Finalize);
        if !session.is_fully_acknowledged() {
            return Err(ProviderError::Rejected(
                "finalize before all bytes were received".to_string(),
            ));
        }
        Ok(FinalizeOutcome {
            media_id: session.handle.media_id.clone(),
            processing: self.next_processing(),
        })
    }

    async fn poll_status(
        &self,
        _credential: &ProviderCredential,
        _media_id: &str,
    ) -> UploadResult<ProcessingState> {
        self.lock().calls.push(UploadCall::Status);
        Ok(self.next_processing())
    }
}
