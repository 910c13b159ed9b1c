//! Mock provider for testing
//!
//! Simulates successes, transient and permanent failures, and latency without
//! network access. Media uploads go through a [`MockUploadAdapter`], so the
//! full chunked-upload path still runs.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::credentials::ProviderCredential;
use crate::error::ProviderError;
use crate::providers::Provider;
use crate::retry::FixedBackoff;
use crate::upload::mock::MockUploadAdapter;
use crate::upload::{ChunkedUploader, UploadSettings};

/// Configuration for mock provider behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Provider name (e.g. "mock-x")
    pub name: String,

    /// Error returned by publish while `failures_remaining` is non-zero
    pub publish_error: Option<ProviderError>,

    /// How many publish calls fail before one succeeds; `None` fails forever
    pub failures_remaining: Option<u32>,

    /// Delay before publish completes (simulates network latency)
    pub delay: Duration,

    pub character_limit: Option<usize>,

    /// Chunk size handed to the uploader
    pub chunk_size: u64,

    pub publish_call_count: Arc<Mutex<usize>>,

    /// Text of every successful publish
    pub posted_content: Arc<Mutex<Vec<String>>>,

    /// Media ids passed to every successful publish
    pub posted_media: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            publish_error: None,
            failures_remaining: Some(0),
            delay: Duration::ZERO,
            character_limit: None,
            chunk_size: 1024,
            publish_call_count: Arc::new(Mutex::new(0)),
            posted_content: Arc::new(Mutex::new(Vec::new())),
            posted_media: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub struct MockProvider {
    config: MockConfig,
    adapter: Arc<MockUploadAdapter>,
    uploader: ChunkedUploader,
    failures: Mutex<Option<u32>>,
}

impl MockProvider {
    pub fn new(config: MockConfig) -> Self {
        let adapter = Arc::new(MockUploadAdapter::new());
        let uploader = ChunkedUploader::new(
            config.name.clone(),
            adapter.clone(),
            Arc::new(FixedBackoff::new(3, Duration::ZERO)),
            UploadSettings {
                chunk_size: config.chunk_size,
                poll_interval: Duration::ZERO,
                max_polls: 3,
            },
        );
        let failures = Mutex::new(config.failures_remaining);
        Self {
            config,
            adapter,
            uploader,
            failures,
        }
    }

    /// A provider that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// A provider whose publish always fails with `error`
    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            publish_error: Some(error),
            failures_remaining: None,
            ..Default::default()
        })
    }

    /// A provider whose publish fails `times` times, then succeeds
    pub fn flaky(name: &str, times: u32, error: ProviderError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            publish_error: Some(error),
            failures_remaining: Some(times),
            ..Default::default()
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    pub fn with_character_limit(mut self, limit: usize) -> Self {
        self.config.character_limit = Some(limit);
        self
    }

    /// Upload adapter behind this provider, for scripting chunk failures
    pub fn upload_adapter(&self) -> Arc<MockUploadAdapter> {
        self.adapter.clone()
    }

    pub fn publish_call_count(&self) -> usize {
        *lock(&self.config.publish_call_count)
    }

    pub fn posted_content(&self) -> Vec<String> {
        lock(&self.config.posted_content).clone()
    }

    pub fn posted_media(&self) -> Vec<Vec<String>> {
        lock(&self.config.posted_media).clone()
    }

    /// Consume one scripted failure, if any remain
    fn next_failure(&self) -> Option<ProviderError> {
        let error = self.config.publish_error.clone()?;
        let mut failures = lock(&self.failures);
        match failures.as_mut() {
            None => Some(error),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(error)
            }
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }

    fn uploader(&self) -> &ChunkedUploader {
        &self.uploader
    }

    async fn publish(
        &self,
        _credential: &ProviderCredential,
        text: &str,
        media_ids: &[String],
    ) -> Result<String, ProviderError> {
        let call = {
            let mut count = lock(&self.config.publish_call_count);
            *count += 1;
            *count
        };

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if let Some(error) = self.next_failure() {
            return Err(error);
        }

        lock(&self.config.posted_content).push(text.to_string());
        lock(&self.config.posted_media).push(media_ids.to_vec());

        Ok(format!("{}-post-{}", self.config.name, call))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
