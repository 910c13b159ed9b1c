//! Submission front door: pre-flight checks, then queue, schedule or publish
//!
//! Quota, character-limit and media-validation failures are returned
//! synchronously. Anything that goes wrong after the post is queued is
//! recorded on its provider outcomes instead.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::Database;
use crate::error::{CrosspostError, Result};
use crate::media::{MediaCandidate, MediaValidator};
use crate::orchestrator::{AbortReport, PublishOrchestrator, PublishReport};
use crate::quota::{QuotaGate, QuotaOperation};
use crate::tracker::StatusTracker;
use crate::types::{MediaAsset, Post, PostStatus};

/// Request to publish content
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub owner_id: String,
    pub content: String,
    pub providers: Vec<String>,
    /// Already-registered media asset ids, in display order
    pub media_ids: Vec<String>,
    /// `None` publishes immediately
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub post_id: String,
    pub status: PostStatus,
    /// Present when the post was published immediately
    pub report: Option<PublishReport>,
}

/// Request to record a media asset produced by the generator
#[derive(Debug, Clone)]
pub struct GeneratedMediaRequest {
    pub owner_id: String,
    pub storage_key: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

#[derive(Clone)]
pub struct PostingService {
    db: Database,
    tracker: StatusTracker,
    orchestrator: PublishOrchestrator,
    quota: std::sync::Arc<QuotaGate>,
    validator: MediaValidator,
}

impl PostingService {
    pub fn new(
        db: Database,
        orchestrator: PublishOrchestrator,
        quota: std::sync::Arc<QuotaGate>,
        validator: MediaValidator,
    ) -> Self {
        Self {
            tracker: orchestrator.tracker().clone(),
            db,
            orchestrator,
            quota,
            validator,
        }
    }

    /// Run pre-flight checks and create the post.
    ///
    /// Immediate posts are published before this returns; scheduled posts
    /// are left in `SCHEDULED` for the due-post trigger.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unknown providers or an empty post, `QuotaExceeded`
    /// when the plan limit is reached, `Validation` for text or media that
    /// breaks a provider's rules.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Submission> {
        let now = Utc::now();
        let scheduled_at = request.scheduled_at.filter(|at| *at > now);
        self.preflight(&request, scheduled_at.is_some()).await?;

        let mut post = Post::new(request.owner_id, request.content, request.providers)
            .with_media(request.media_ids);
        if let Some(at) = scheduled_at {
            post = post.scheduled_for(at.timestamp());
        }

        self.tracker.create_post(&post).await?;
        self.tracker.mark_queued(&post.id).await?;

        if let Some(at) = scheduled_at {
            self.tracker.mark_scheduled(&post.id).await?;
            info!(post_id = %post.id, at = %at.to_rfc3339(), "Post scheduled");
            return Ok(Submission {
                post_id: post.id,
                status: PostStatus::Scheduled,
                report: None,
            });
        }

        let report = self.orchestrator.publish(&post.id).await?;
        let status = match &report {
            Some(report) => report.status,
            None => self.tracker.get_post(&post.id).await?.status,
        };
        Ok(Submission {
            post_id: post.id,
            status,
            report,
        })
    }

    async fn preflight(&self, request: &SubmitRequest, scheduled: bool) -> Result<()> {
        if request.providers.is_empty() {
            return Err(CrosspostError::InvalidInput(
                "at least one provider must be selected".to_string(),
            ));
        }
        let registry = self.orchestrator.providers();
        let unknown: Vec<&str> = request
            .providers
            .iter()
            .filter(|p| !registry.contains(p))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(CrosspostError::InvalidInput(format!(
                "unknown provider(s): {} (available: {})",
                unknown.join(", "),
                registry.names().join(", ")
            )));
        }
        if request.content.trim().is_empty() && request.media_ids.is_empty() {
            return Err(CrosspostError::InvalidInput(
                "post needs text or media".to_string(),
            ));
        }

        let operation = if scheduled {
            QuotaOperation::SchedulePost
        } else {
            QuotaOperation::CreatePost
        };
        self.quota
            .check(&request.owner_id, operation)
            .await?
            .into_result()?;

        for name in &request.providers {
            if let Some(provider) = registry.get(name) {
                provider.validate_content(&request.content)?;
            }
        }

        let assets = self.db.get_media_assets(&request.media_ids).await?;
        if let Some(foreign) = assets.iter().find(|a| a.owner_id != request.owner_id) {
            return Err(CrosspostError::InvalidInput(format!(
                "media {} belongs to another user",
                foreign.id
            )));
        }
        let candidates: Vec<MediaCandidate> = assets.iter().map(MediaCandidate::from).collect();
        self.validator
            .validate_for_providers(&request.providers, &candidates)?;
        Ok(())
    }

    /// Record a generated media asset, subject to the generated-media quota
    pub async fn register_generated_media(
        &self,
        request: GeneratedMediaRequest,
    ) -> Result<MediaAsset> {
        self.quota
            .check(&request.owner_id, QuotaOperation::GenerateMedia)
            .await?
            .into_result()?;

        let mut asset = MediaAsset::new(
            request.owner_id,
            request.storage_key,
            request.file_name,
            request.mime_type,
            request.size_bytes,
        );
        asset.generated = true;
        self.db.insert_media_asset(&asset).await?;
        info!(asset_id = %asset.id, "Generated media registered");
        Ok(asset)
    }

    /// Record an uploaded (not generated) media asset
    pub async fn register_media(
        &self,
        owner_id: &str,
        storage_key: &str,
        file_name: &str,
        mime_type: &str,
        size_bytes: u64,
    ) -> Result<MediaAsset> {
        let asset = MediaAsset::new(
            owner_id.to_string(),
            storage_key.to_string(),
            file_name.to_string(),
            mime_type.to_string(),
            size_bytes,
        );
        self.db.insert_media_asset(&asset).await?;
        Ok(asset)
    }

    pub async fn abort(&self, post_id: &str) -> Result<AbortReport> {
        self.orchestrator.abort(post_id).await
    }
}
