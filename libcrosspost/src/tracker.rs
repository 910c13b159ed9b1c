//! Status tracker: the only writer of post status and provider outcomes
//!
//! Other components propose results here. Every write goes through a
//! conditional update in [`Database`], so replays and late arrivals are
//! no-ops, and the post-level aggregate is recomputed from the stored
//! outcomes after each write rather than cached.

use tracing::{debug, info};

use crate::db::Database;
use crate::error::{CrosspostError, PublishError, Result};
use crate::types::{ErrorClass, OutcomeStatus, Post, PostStatus, ProviderOutcome};

/// Terminal result proposed for one (post, provider) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeResult {
    Succeeded { external_id: String },
    Failed { class: ErrorClass, message: String },
}

impl OutcomeResult {
    pub fn failed(error: &PublishError) -> Self {
        OutcomeResult::Failed {
            class: error.class(),
            message: error.to_string(),
        }
    }
}

/// What a terminal write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    /// False when the outcome was already terminal
    pub applied: bool,
    /// Set only for the single write that moved the post to a terminal status
    pub completed: Option<PostStatus>,
}

#[derive(Clone)]
pub struct StatusTracker {
    db: Database,
}

impl StatusTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a freshly built post in `CREATED`
    pub async fn create_post(&self, post: &Post) -> Result<()> {
        if post.status != PostStatus::Created {
            return Err(CrosspostError::InvalidState(format!(
                "new post must start as created, got {}",
                post.status
            )));
        }
        self.db.create_post(post).await
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Post> {
        self.db
            .get_post(post_id)
            .await?
            .ok_or_else(|| CrosspostError::NotFound(format!("post {}", post_id)))
    }

    /// `CREATED -> QUEUED`, after pre-flight checks passed
    pub async fn mark_queued(&self, post_id: &str) -> Result<bool> {
        self.transition(post_id, &[PostStatus::Created], PostStatus::Queued)
            .await
    }

    /// `QUEUED -> SCHEDULED`
    pub async fn mark_scheduled(&self, post_id: &str) -> Result<bool> {
        self.transition(post_id, &[PostStatus::Queued], PostStatus::Scheduled)
            .await
    }

    /// `QUEUED|SCHEDULED -> PUBLISHING` plus one pending outcome per
    /// provider. True for exactly one caller per post.
    pub async fn begin_publishing(&self, post: &Post) -> Result<bool> {
        let started = self.db.begin_publishing(&post.id, &post.providers).await?;
        if started {
            info!(post_id = %post.id, providers = ?post.providers, "Publishing started");
        } else {
            debug!(post_id = %post.id, "Publishing already started, skipping");
        }
        Ok(started)
    }

    /// Record a non-terminal step; ignored once the outcome is terminal
    pub async fn record_progress(
        &self,
        post_id: &str,
        provider: &str,
        status: OutcomeStatus,
        attempts: u32,
    ) -> Result<bool> {
        if status.is_terminal() {
            return Err(CrosspostError::InvalidState(format!(
                "{} is terminal, use record_provider_result",
                status
            )));
        }
        self.db
            .update_outcome_progress(post_id, provider, status, attempts)
            .await
    }

    /// Record a provider's terminal result.
    ///
    /// Replaying a result for an outcome that is already terminal writes
    /// nothing. The aggregate is checked after every call, so the post
    /// completes on whichever write makes the last outcome terminal.
    pub async fn record_provider_result(
        &self,
        post_id: &str,
        provider: &str,
        result: OutcomeResult,
        attempts: u32,
    ) -> Result<Recorded> {
        let (status, error_class, error_message, external_id) = match result {
            OutcomeResult::Succeeded { external_id } => {
                (OutcomeStatus::Succeeded, None, None, Some(external_id))
            }
            OutcomeResult::Failed { class, message } => {
                (OutcomeStatus::Failed, Some(class), Some(message), None)
            }
        };

        let outcome = ProviderOutcome {
            post_id: post_id.to_string(),
            provider: provider.to_string(),
            status,
            error_class,
            error_message,
            attempts,
            external_id,
            updated_at: chrono::Utc::now().timestamp(),
        };

        let applied = self.db.finalize_outcome(&outcome).await?;
        if applied {
            debug!(post_id = %post_id, provider = %provider, status = %status, attempts, "Provider outcome recorded");
        } else {
            debug!(post_id = %post_id, provider = %provider, "Provider outcome already terminal");
        }

        let completed = self.settle(post_id).await?;
        Ok(Recorded { applied, completed })
    }

    /// Aggregate of the stored outcomes; `None` while any is in flight
    pub async fn current_aggregate(&self, post_id: &str) -> Result<Option<PostStatus>> {
        let outcomes = self.db.get_outcomes(post_id).await?;
        Ok(PostStatus::aggregate(outcomes.iter().map(|o| &o.status)))
    }

    pub async fn outcomes(&self, post_id: &str) -> Result<Vec<ProviderOutcome>> {
        self.db.get_outcomes(post_id).await
    }

    /// True once the provider's outcome is terminal, whoever wrote it
    pub async fn is_settled(&self, post_id: &str, provider: &str) -> Result<bool> {
        Ok(self
            .db
            .get_outcome(post_id, provider)
            .await?
            .is_some_and(|o| o.status.is_terminal()))
    }

    /// Fail every outcome still in flight with class `cancelled`.
    ///
    /// Returns the cancelled providers and, if this call finished the post,
    /// its terminal status.
    pub async fn cancel_pending(
        &self,
        post_id: &str,
    ) -> Result<(Vec<String>, Option<PostStatus>)> {
        let cancelled = self
            .db
            .cancel_open_outcomes(post_id, &PublishError::Cancelled.to_string())
            .await?;
        if !cancelled.is_empty() {
            info!(post_id = %post_id, providers = ?cancelled, "Cancelled in-flight providers");
        }
        let completed = self.settle(post_id).await?;
        Ok((cancelled, completed))
    }

    /// Move the post to its aggregate status if every outcome is terminal.
    /// Only the caller that performs the transition gets `Some`.
    pub async fn settle(&self, post_id: &str) -> Result<Option<PostStatus>> {
        let Some(aggregate) = self.current_aggregate(post_id).await? else {
            return Ok(None);
        };

        if self.db.complete_post(post_id, aggregate).await? {
            info!(post_id = %post_id, status = %aggregate, "Post reached terminal status");
            Ok(Some(aggregate))
        } else {
            Ok(None)
        }
    }

    async fn transition(&self, post_id: &str, from: &[PostStatus], to: PostStatus) -> Result<bool> {
        let moved = self.db.transition_post_status(post_id, from, to).await?;
        if moved {
            debug!(post_id = %post_id, status = %to, "Post status changed");
        }
        Ok(moved)
    }
}
