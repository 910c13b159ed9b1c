//! Publish orchestration
//!
//! Fans one post out to its selected providers. Each provider runs its own
//! upload-then-publish sequence concurrently with the others; results are
//! proposed to the [`StatusTracker`], which completes the post once every
//! outcome is terminal. The notification fires from whichever call performed
//! that completion, so it happens once per post.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::error::{CrosspostError, ProviderError, PublishError, Result};
use crate::notify::NotificationDispatcher;
use crate::providers::{Provider, ProviderRegistry};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::storage::MediaStore;
use crate::tracker::{OutcomeResult, StatusTracker};
use crate::types::{ErrorClass, OutcomeStatus, Post, PostStatus, ProviderOutcome};
use crate::upload::AssetMeta;

/// How often a running provider sequence checks whether its outcome was
/// settled by another process (an abort from the CLI, for one)
pub const SETTLED_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Tries at writing a terminal result before falling back to a failure
const RECORD_ATTEMPTS: u32 = 2;

/// Media read once per publish and shared by every provider sequence
type LoadedMedia = std::result::Result<Arc<Vec<(AssetMeta, Bytes)>>, PublishError>;

/// Result of one fan-out
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub post_id: String,
    pub status: PostStatus,
    pub outcomes: Vec<ProviderOutcome>,
}

impl PublishReport {
    pub fn succeeded(&self) -> Vec<&str> {
        self.by_status(OutcomeStatus::Succeeded)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.by_status(OutcomeStatus::Failed)
    }

    fn by_status(&self, status: OutcomeStatus) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == status)
            .map(|o| o.provider.as_str())
            .collect()
    }
}

/// Result of a user abort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortReport {
    pub cancelled: Vec<String>,
    pub status: Option<PostStatus>,
}

#[derive(Clone)]
pub struct PublishOrchestrator {
    db: Database,
    tracker: StatusTracker,
    providers: ProviderRegistry,
    credentials: Arc<dyn CredentialStore>,
    store: Arc<dyn MediaStore>,
    policy: Arc<dyn RetryPolicy>,
    notifier: Arc<NotificationDispatcher>,
    in_flight: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
    settled_poll: Duration,
}

impl PublishOrchestrator {
    pub fn new(
        db: Database,
        providers: ProviderRegistry,
        credentials: Arc<dyn CredentialStore>,
        store: Arc<dyn MediaStore>,
        policy: Arc<dyn RetryPolicy>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            tracker: StatusTracker::new(db.clone()),
            db,
            providers,
            credentials,
            store,
            policy,
            notifier,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            settled_poll: SETTLED_POLL_INTERVAL,
        }
    }

    pub fn with_settled_poll(mut self, interval: Duration) -> Self {
        self.settled_poll = interval;
        self
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<bool>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a queued or scheduled post to every selected provider.
    ///
    /// Returns `Ok(None)` if another caller already started this post's
    /// fan-out. Provider failures are recorded on the outcomes, never
    /// returned as errors.
    pub async fn publish(&self, post_id: &str) -> Result<Option<PublishReport>> {
        let post = self.tracker.get_post(post_id).await?;
        if !self.tracker.begin_publishing(&post).await? {
            return Ok(None);
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.in_flight().insert(post.id.clone(), cancel_tx);

        let media = self.load_media(&post).await;
        let runs = post
            .providers
            .iter()
            .map(|name| self.run_provider(&post, name, &media, cancel_rx.clone()));
        let mut completions: Vec<PostStatus> = join_all(runs).await.into_iter().flatten().collect();

        self.in_flight().remove(&post.id);

        // a completion lost to a failed write is picked up here
        if completions.is_empty() {
            match self.tracker.settle(&post.id).await {
                Ok(Some(status)) => completions.push(status),
                Ok(None) => {}
                Err(e) => warn!(post_id = %post.id, error = %e, "Failed to settle post"),
            }
        }

        for completed in completions {
            self.notify(&post, completed).await;
        }

        let post = self.tracker.get_post(&post.id).await?;
        let outcomes = self.tracker.outcomes(&post.id).await?;
        info!(
            post_id = %post.id,
            status = %post.status,
            "Fan-out finished"
        );

        Ok(Some(PublishReport {
            post_id: post.id,
            status: post.status,
            outcomes,
        }))
    }

    /// Stop an in-flight post. Outcomes still running are failed as
    /// cancelled right away; already-published providers are left as is.
    pub async fn abort(&self, post_id: &str) -> Result<AbortReport> {
        let post = self.tracker.get_post(post_id).await?;
        if post.status.is_terminal() {
            return Ok(AbortReport {
                cancelled: Vec::new(),
                status: Some(post.status),
            });
        }
        if post.status != PostStatus::Publishing {
            return Err(CrosspostError::InvalidState(format!(
                "post {} is {} and has not started publishing",
                post_id, post.status
            )));
        }

        if let Some(signal) = self.in_flight().get(post_id) {
            let _ = signal.send(true);
        }

        let (cancelled, completed) = self.tracker.cancel_pending(post_id).await?;
        if let Some(status) = completed {
            self.notify(&post, status).await;
        }

        let status = self.tracker.get_post(post_id).await?.status;
        Ok(AbortReport {
            cancelled,
            status: status.is_terminal().then_some(status),
        })
    }

    async fn notify(&self, post: &Post, status: PostStatus) {
        let outcomes = match self.tracker.outcomes(&post.id).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(post_id = %post.id, error = %e, "Failed to load outcomes for notification");
                return;
            }
        };
        if let Err(e) = self.notifier.dispatch(post, status, &outcomes).await {
            warn!(post_id = %post.id, error = %e, "Failed to dispatch notification");
        }
    }

    async fn load_media(&self, post: &Post) -> LoadedMedia {
        if post.media_ids.is_empty() {
            return Ok(Arc::new(Vec::new()));
        }

        let assets = self
            .db
            .get_media_assets(&post.media_ids)
            .await
            .map_err(|e| PublishError::MediaUnavailable(e.to_string()))?;

        let mut loaded = Vec::with_capacity(assets.len());
        for asset in &assets {
            let meta = AssetMeta::from_asset(asset)
                .map_err(|e| PublishError::MediaUnavailable(e.to_string()))?;
            let bytes = self.store.read(&asset.storage_key).await.map_err(|e| {
                PublishError::MediaUnavailable(format!("{}: {}", asset.file_name, e))
            })?;
            loaded.push((meta, bytes));
        }
        Ok(Arc::new(loaded))
    }

    /// Drive one provider to a terminal outcome. Returns the post's terminal
    /// status if recording this outcome completed the post.
    async fn run_provider(
        &self,
        post: &Post,
        provider_name: &str,
        media: &LoadedMedia,
        cancel: watch::Receiver<bool>,
    ) -> Option<PostStatus> {
        let (result, attempts) = tokio::select! {
            biased;
            _ = cancelled(cancel) => (Err(PublishError::Cancelled), 0),
            _ = self.settled_elsewhere(&post.id, provider_name) => (Err(PublishError::Cancelled), 0),
            run = self.attempt_with_retry(post, provider_name, media) => run,
        };

        let result = match result {
            Ok(external_id) => {
                info!(post_id = %post.id, provider = %provider_name, external_id = %external_id, "Published");
                OutcomeResult::Succeeded { external_id }
            }
            Err(e) => {
                warn!(post_id = %post.id, provider = %provider_name, error = %e, "Provider failed");
                OutcomeResult::failed(&e)
            }
        };

        match self.record(&post.id, provider_name, result, attempts).await {
            Ok(completed) => completed,
            Err(e) => {
                error!(post_id = %post.id, provider = %provider_name, error = %e, "Outcome could not be recorded");
                None
            }
        }
    }

    /// Write a terminal result. If it cannot be stored, the outcome is
    /// failed instead so the post still reaches a terminal status.
    async fn record(
        &self,
        post_id: &str,
        provider: &str,
        result: OutcomeResult,
        attempts: u32,
    ) -> Result<Option<PostStatus>> {
        let mut reason = String::new();
        for _ in 0..RECORD_ATTEMPTS {
            match self
                .tracker
                .record_provider_result(post_id, provider, result.clone(), attempts)
                .await
            {
                Ok(recorded) => return Ok(recorded.completed),
                Err(e) => {
                    warn!(post_id = %post_id, provider = %provider, error = %e, "Failed to record outcome");
                    reason = e.to_string();
                }
            }
        }

        let fallback = OutcomeResult::Failed {
            class: ErrorClass::Permanent,
            message: format!("outcome could not be recorded: {}", reason),
        };
        let recorded = self
            .tracker
            .record_provider_result(post_id, provider, fallback, attempts)
            .await?;
        Ok(recorded.completed)
    }

    /// Resolves once the stored outcome turns terminal behind our back
    async fn settled_elsewhere(&self, post_id: &str, provider: &str) {
        loop {
            sleep(self.settled_poll).await;
            match self.tracker.is_settled(post_id, provider).await {
                Ok(true) => {
                    info!(post_id = %post_id, provider = %provider, "Outcome settled elsewhere, stopping");
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(post_id = %post_id, provider = %provider, error = %e, "Failed to read outcome");
                }
            }
        }
    }

    /// Stop before a side effect if the outcome is already terminal
    async fn ensure_open(&self, post: &Post, provider: &str) -> std::result::Result<(), PublishError> {
        match self.tracker.is_settled(&post.id, provider).await {
            Ok(true) => Err(PublishError::Cancelled),
            Ok(false) => Ok(()),
            Err(e) => {
                warn!(post_id = %post.id, provider = %provider, error = %e, "Failed to read outcome");
                Ok(())
            }
        }
    }

    /// Run the whole provider sequence, retrying it per the publish policy
    async fn attempt_with_retry(
        &self,
        post: &Post,
        provider_name: &str,
        media: &LoadedMedia,
    ) -> (std::result::Result<String, PublishError>, u32) {
        let media = match media {
            Ok(media) => media,
            Err(e) => return (Err(e.clone()), 0),
        };
        let Some(provider) = self.providers.get(provider_name) else {
            let error = ProviderError::Rejected(format!("provider {} is not configured", provider_name));
            return (Err(PublishError::PublishFailed(error)), 0);
        };

        let mut attempt = 1u32;
        loop {
            match self.attempt(post, provider.as_ref(), media, attempt).await {
                Ok(external_id) => return (Ok(external_id), attempt),
                Err(e) => match self.policy.decide(attempt, e.class()) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            post_id = %post.id,
                            provider = %provider_name,
                            attempt,
                            error = %e,
                            "Provider sequence failed, retrying in {:?}",
                            delay
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::Stop => return (Err(e), attempt),
                },
            }
        }
    }

    async fn attempt(
        &self,
        post: &Post,
        provider: &dyn Provider,
        media: &[(AssetMeta, Bytes)],
        attempt: u32,
    ) -> std::result::Result<String, PublishError> {
        let name = provider.name();
        self.ensure_open(post, name).await?;
        let credential = match self.credentials.credential_for(&post.owner_id, name).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return Err(PublishError::PublishFailed(ProviderError::NotLinked(format!(
                    "no {} account linked",
                    name
                ))))
            }
            Err(e) => {
                return Err(PublishError::PublishFailed(ProviderError::Network(format!(
                    "credential lookup failed: {}",
                    e
                ))))
            }
        };

        let mut media_ids = Vec::with_capacity(media.len());
        if !media.is_empty() {
            self.progress(post, name, OutcomeStatus::Uploading, attempt).await;
            for (meta, bytes) in media {
                self.ensure_open(post, name).await?;
                let uploaded = provider
                    .uploader()
                    .upload(&credential, meta, bytes.clone())
                    .await
                    .map_err(PublishError::UploadFailed)?;
                media_ids.push(uploaded.media_id);
            }
        }

        self.ensure_open(post, name).await?;
        self.progress(post, name, OutcomeStatus::Publishing, attempt).await;
        provider
            .publish(&credential, &post.content, &media_ids)
            .await
            .map_err(PublishError::PublishFailed)
    }

    async fn progress(&self, post: &Post, provider: &str, status: OutcomeStatus, attempt: u32) {
        if let Err(e) = self
            .tracker
            .record_progress(&post.id, provider, status, attempt)
            .await
        {
            warn!(post_id = %post.id, provider = %provider, error = %e, "Failed to record progress");
        }
    }
}

/// Resolves once the abort signal is raised; never if the sender goes away
async fn cancelled(mut signal: watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::notify::{ConnectionRegistry, MemoryMailer};
    use crate::providers::mock::MockProvider;
    use crate::retry::FixedBackoff;
    use crate::storage::MemoryMediaStore;
    use crate::types::{ErrorClass, MediaAsset};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        db: Database,
        credentials: Arc<MemoryCredentialStore>,
        store: Arc<MemoryMediaStore>,
        mailer: MemoryMailer,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let db = Database::new(dir.path().join("test.db").to_str().unwrap())
                .await
                .unwrap();
            Self {
                _dir: dir,
                db,
                credentials: Arc::new(MemoryCredentialStore::new()),
                store: Arc::new(MemoryMediaStore::new()),
                mailer: MemoryMailer::new(),
            }
        }

        fn orchestrator(&self, providers: Vec<Arc<MockProvider>>) -> PublishOrchestrator {
            let mut registry = ProviderRegistry::new();
            for provider in providers {
                registry.register(provider);
            }
            let notifier = NotificationDispatcher::new(
                self.db.clone(),
                Arc::new(self.mailer.clone()),
                ConnectionRegistry::new(),
            );
            PublishOrchestrator::new(
                self.db.clone(),
                registry,
                self.credentials.clone(),
                self.store.clone(),
                Arc::new(FixedBackoff::new(3, Duration::ZERO)),
                Arc::new(notifier),
            )
        }

        async fn link(&self, providers: &[&str]) {
            for provider in providers {
                self.credentials
                    .link("user-1", provider, "acct", "token")
                    .await
                    .unwrap();
            }
        }

        async fn queued_post(&self, providers: &[&str], media: Vec<String>) -> Post {
            let post = Post::new(
                "user-1".to_string(),
                "Hello everyone".to_string(),
                providers.iter().map(|p| p.to_string()).collect(),
            )
            .with_media(media);
            self.db.create_post(&post).await.unwrap();
            self.db
                .transition_post_status(&post.id, &[PostStatus::Created], PostStatus::Queued)
                .await
                .unwrap();
            post
        }
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let h = Harness::new().await;
        h.link(&["a", "b"]).await;
        let a = Arc::new(MockProvider::success("a"));
        let b = Arc::new(MockProvider::success("b"));
        let orchestrator = h.orchestrator(vec![a.clone(), b.clone()]);

        let post = h.queued_post(&["a", "b"], vec![]).await;
        let report = orchestrator.publish(&post.id).await.unwrap().unwrap();

        assert_eq!(report.status, PostStatus::Success);
        assert_eq!(report.succeeded(), vec!["a", "b"]);
        assert_eq!(a.posted_content(), vec!["Hello everyone"]);
        assert_eq!(report.outcomes[0].external_id.as_deref(), Some("a-post-1"));
    }

    #[tokio::test]
    async fn test_partial_after_exhausted_retries() {
        let h = Harness::new().await;
        h.link(&["a", "b", "c"]).await;
        let a = Arc::new(MockProvider::success("a"));
        let b = Arc::new(MockProvider::failing(
            "b",
            ProviderError::Server {
                status: 503,
                message: "HTTP 503".into(),
            },
        ));
        let c = Arc::new(MockProvider::success("c"));
        let orchestrator = h.orchestrator(vec![a, b.clone(), c]);

        let post = h.queued_post(&["a", "b", "c"], vec![]).await;
        let report = orchestrator.publish(&post.id).await.unwrap().unwrap();

        assert_eq!(report.status, PostStatus::Partial);
        assert_eq!(report.failed(), vec!["b"]);
        assert_eq!(report.succeeded().len(), 2);
        assert_eq!(b.publish_call_count(), 3);

        let failed = &report.outcomes[1];
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.error_class, Some(ErrorClass::Transient));
        assert_eq!(h.mailer.sent().len(), 0, "user-1 has no stored email address");
        assert_eq!(h.db.list_notifications("user-1", false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let h = Harness::new().await;
        h.link(&["a"]).await;
        let a = Arc::new(MockProvider::failing("a", ProviderError::Authentication("revoked".into())));
        let orchestrator = h.orchestrator(vec![a.clone()]);

        let post = h.queued_post(&["a"], vec![]).await;
        let report = orchestrator.publish(&post.id).await.unwrap().unwrap();

        assert_eq!(report.status, PostStatus::Failed);
        assert_eq!(a.publish_call_count(), 1);
        assert_eq!(report.outcomes[0].error_class, Some(ErrorClass::Permanent));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_only_that_provider() {
        let h = Harness::new().await;
        h.link(&["a"]).await;
        let orchestrator = h.orchestrator(vec![
            Arc::new(MockProvider::success("a")),
            Arc::new(MockProvider::success("b")),
        ]);

        let post = h.queued_post(&["a", "b"], vec![]).await;
        let report = orchestrator.publish(&post.id).await.unwrap().unwrap();

        assert_eq!(report.status, PostStatus::Partial);
        let b = &report.outcomes[1];
        assert!(b.error_message.as_deref().unwrap().contains("no b account linked"));
    }

    #[tokio::test]
    async fn test_publish_only_once() {
        let h = Harness::new().await;
        h.link(&["a"]).await;
        let a = Arc::new(MockProvider::success("a"));
        let orchestrator = h.orchestrator(vec![a.clone()]);

        let post = h.queued_post(&["a"], vec![]).await;
        assert!(orchestrator.publish(&post.id).await.unwrap().is_some());
        assert!(orchestrator.publish(&post.id).await.unwrap().is_none());
        assert_eq!(a.publish_call_count(), 1);
        assert_eq!(h.db.list_notifications("user-1", false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_media_uploaded_before_publish() {
        let h = Harness::new().await;
        h.link(&["a"]).await;
        let a = Arc::new(MockProvider::success("a"));
        let orchestrator = h.orchestrator(vec![a.clone()]);

        let data = Bytes::from(vec![7u8; 3000]);
        h.store.put("user-1/photo.png", data.clone()).await.unwrap();
        let asset = MediaAsset::new(
            "user-1".to_string(),
            "user-1/photo.png".to_string(),
            "photo.png".to_string(),
            "image/png".to_string(),
            3000,
        );
        h.db.insert_media_asset(&asset).await.unwrap();

        let post = h.queued_post(&["a"], vec![asset.id.clone()]).await;
        let report = orchestrator.publish(&post.id).await.unwrap().unwrap();

        assert_eq!(report.status, PostStatus::Success);
        assert_eq!(a.upload_adapter().received_bytes(), data.to_vec());
        assert_eq!(a.posted_media().len(), 1);

        let statuses: Vec<OutcomeStatus> = h
            .db
            .list_outcome_events(&post.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                OutcomeStatus::Pending,
                OutcomeStatus::Uploading,
                OutcomeStatus::Publishing,
                OutcomeStatus::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_media_fails_every_provider() {
        let h = Harness::new().await;
        h.link(&["a", "b"]).await;
        let orchestrator = h.orchestrator(vec![
            Arc::new(MockProvider::success("a")),
            Arc::new(MockProvider::success("b")),
        ]);

        let asset = MediaAsset::new(
            "user-1".to_string(),
            "gone.png".to_string(),
            "gone.png".to_string(),
            "image/png".to_string(),
            10,
        );
        h.db.insert_media_asset(&asset).await.unwrap();

        let post = h.queued_post(&["a", "b"], vec![asset.id.clone()]).await;
        let report = orchestrator.publish(&post.id).await.unwrap().unwrap();

        assert_eq!(report.status, PostStatus::Failed);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.error_message.as_deref().unwrap().contains("Media unavailable")));
    }

    #[tokio::test]
    async fn test_abort_cancels_in_flight() {
        let h = Harness::new().await;
        h.link(&["fast", "slow"]).await;
        let slow = Arc::new(MockProvider::success("slow").with_delay(Duration::from_secs(30)));
        let orchestrator = h.orchestrator(vec![Arc::new(MockProvider::success("fast")), slow]);

        let post = h.queued_post(&["fast", "slow"], vec![]).await;
        let runner = orchestrator.clone();
        let post_id = post.id.clone();
        let handle = tokio::spawn(async move { runner.publish(&post_id).await });

        // wait for the fast provider to finish
        let mut fast_done = false;
        for _ in 0..200 {
            let outcomes = orchestrator.tracker().outcomes(&post.id).await.unwrap();
            if outcomes.iter().any(|o| o.provider == "fast" && o.status == OutcomeStatus::Succeeded) {
                fast_done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(fast_done);

        let abort = orchestrator.abort(&post.id).await.unwrap();
        assert_eq!(abort.cancelled, vec!["slow"]);
        assert_eq!(abort.status, Some(PostStatus::Partial));

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report.status, PostStatus::Partial);
        assert_eq!(report.outcomes[1].error_class, Some(ErrorClass::Cancelled));
        assert_eq!(h.db.list_notifications("user-1", false).await.unwrap().len(), 1);
    }

    async fn wait_for_publish_call(provider: &MockProvider) {
        for _ in 0..200 {
            if provider.publish_call_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("provider was never called");
    }

    #[tokio::test]
    async fn test_abort_from_another_instance_stops_running_publish() {
        let h = Harness::new().await;
        h.link(&["slow"]).await;
        let slow = Arc::new(MockProvider::success("slow").with_delay(Duration::from_millis(500)));
        let daemon = h
            .orchestrator(vec![slow.clone()])
            .with_settled_poll(Duration::from_millis(20));

        let post = h.queued_post(&["slow"], vec![]).await;
        let runner = daemon.clone();
        let post_id = post.id.clone();
        let handle = tokio::spawn(async move { runner.publish(&post_id).await });
        wait_for_publish_call(&slow).await;

        // a separate process shares only the database
        let cli = h.orchestrator(vec![]);
        let abort = cli.abort(&post.id).await.unwrap();
        assert_eq!(abort.cancelled, vec!["slow"]);
        assert_eq!(abort.status, Some(PostStatus::Failed));

        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report.status, PostStatus::Failed);
        assert_eq!(report.outcomes[0].error_class, Some(ErrorClass::Cancelled));
        assert_eq!(slow.publish_call_count(), 1);
        assert!(slow.posted_content().is_empty());
        assert_eq!(h.db.list_notifications("user-1", false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_abort_from_another_instance_prevents_retry() {
        let h = Harness::new().await;
        h.link(&["slow"]).await;
        let slow = Arc::new(
            MockProvider::flaky("slow", 1, ProviderError::Network("reset".into()))
                .with_delay(Duration::from_millis(300)),
        );
        // never polls during the call; the check before the next attempt stops it
        let daemon = h
            .orchestrator(vec![slow.clone()])
            .with_settled_poll(Duration::from_secs(3600));

        let post = h.queued_post(&["slow"], vec![]).await;
        let runner = daemon.clone();
        let post_id = post.id.clone();
        let handle = tokio::spawn(async move { runner.publish(&post_id).await });
        wait_for_publish_call(&slow).await;

        h.orchestrator(vec![]).abort(&post.id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(slow.publish_call_count(), 1);
        assert!(slow.posted_content().is_empty());

        let outcome = h.db.get_outcome(&post.id, "slow").await.unwrap().unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.error_class, Some(ErrorClass::Cancelled));
    }

    #[tokio::test]
    async fn test_exhausted_upload_not_restarted() {
        let h = Harness::new().await;
        h.link(&["a"]).await;
        let a = Arc::new(MockProvider::success("a"));
        a.upload_adapter().fail_chunk(
            0,
            u32::MAX,
            ProviderError::Server {
                status: 503,
                message: "HTTP 503".into(),
            },
        );
        let orchestrator = h.orchestrator(vec![a.clone()]);

        h.store
            .put("user-1/photo.png", Bytes::from(vec![1u8; 3000]))
            .await
            .unwrap();
        let asset = MediaAsset::new(
            "user-1".to_string(),
            "user-1/photo.png".to_string(),
            "photo.png".to_string(),
            "image/png".to_string(),
            3000,
        );
        h.db.insert_media_asset(&asset).await.unwrap();

        let post = h.queued_post(&["a"], vec![asset.id.clone()]).await;
        let report = orchestrator.publish(&post.id).await.unwrap().unwrap();

        assert_eq!(report.status, PostStatus::Failed);
        assert_eq!(report.outcomes[0].error_class, Some(ErrorClass::Permanent));
        assert_eq!(report.outcomes[0].attempts, 1);

        let adapter = a.upload_adapter();
        assert_eq!(adapter.sessions_opened(), 1);
        assert_eq!(adapter.sent_ranges().iter().filter(|r| r.start == 0).count(), 3);
        assert_eq!(a.publish_call_count(), 0);
    }

    #[tokio::test]
    async fn test_unrecordable_result_still_completes_post() {
        let h = Harness::new().await;
        h.link(&["a"]).await;
        let orchestrator = h.orchestrator(vec![Arc::new(MockProvider::success("a"))]);

        sqlx::query(
            r#"
            CREATE TRIGGER reject_success BEFORE UPDATE OF status ON provider_outcomes
            WHEN NEW.status = 'succeeded'
            BEGIN
                SELECT RAISE(ABORT, 'disk I/O error');
            END
            "#,
        )
        .execute(h.db.pool())
        .await
        .unwrap();

        let post = h.queued_post(&["a"], vec![]).await;
        let report = orchestrator.publish(&post.id).await.unwrap().unwrap();

        assert_eq!(report.status, PostStatus::Failed);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .contains("outcome could not be recorded"));
        assert_eq!(h.db.list_notifications("user-1", false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_abort_requires_publishing() {
        let h = Harness::new().await;
        let orchestrator = h.orchestrator(vec![]);
        let post = h.queued_post(&["a"], vec![]).await;
        assert!(orchestrator.abort(&post.id).await.is_err());
    }
}
