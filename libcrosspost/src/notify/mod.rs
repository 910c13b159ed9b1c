//! Notification dispatch on terminal post outcomes
//!
//! [`NotificationDispatcher::dispatch`] is called once per post, by whoever
//! performed the post's transition to a terminal status. It stores a
//! notification, emails the owner and pushes a live event. Email and live
//! delivery are best-effort: failures are logged, never returned.

pub mod email;
pub mod registry;

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::types::{Notification, NotificationKind, OutcomeStatus, Post, PostStatus, ProviderOutcome};

pub use email::{create_mailer, Mailer, MemoryMailer, OutcomeEmail};
pub use registry::{ConnectionGuard, ConnectionRegistry, LiveEvent};

/// Characters of the post text quoted in notifications
const EXCERPT_CHARS: usize = 80;

pub struct NotificationDispatcher {
    db: Database,
    mailer: Arc<dyn Mailer>,
    registry: ConnectionRegistry,
}

impl NotificationDispatcher {
    pub fn new(db: Database, mailer: Arc<dyn Mailer>, registry: ConnectionRegistry) -> Self {
        Self {
            db,
            mailer,
            registry,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Notify the post owner of a terminal outcome
    pub async fn dispatch(
        &self,
        post: &Post,
        status: PostStatus,
        outcomes: &[ProviderOutcome],
    ) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: post.owner_id.clone(),
            post_id: Some(post.id.clone()),
            message: summary(post, status, outcomes),
            kind: NotificationKind::for_status(status),
            read: false,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.db.insert_notification(&notification).await?;

        match self.db.get_user(&post.owner_id).await {
            Ok(Some(user)) => match &user.email {
                Some(address) => {
                    let email = render_email(address, &user.username, post, status, outcomes);
                    if let Err(e) = self.mailer.send(&email).await {
                        warn!(post_id = %post.id, error = %e, "Failed to send outcome email");
                    }
                }
                None => debug!(user_id = %user.id, "User has no email address, skipping email"),
            },
            Ok(None) => debug!(user_id = %post.owner_id, "Unknown user, skipping email"),
            Err(e) => warn!(user_id = %post.owner_id, error = %e, "Failed to load user for email"),
        }

        let delivered = self
            .registry
            .publish(&post.owner_id, LiveEvent::Notification(notification.clone()));
        debug!(post_id = %post.id, connections = delivered, "Live notification published");

        Ok(notification)
    }

    pub async fn list(&self, user_id: &str, unread_only: bool) -> Result<Vec<Notification>> {
        self.db.list_notifications(user_id, unread_only).await
    }

    pub async fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<bool> {
        self.db.mark_notification_read(user_id, notification_id).await
    }
}

fn providers_with(outcomes: &[ProviderOutcome], status: OutcomeStatus) -> Vec<&str> {
    outcomes
        .iter()
        .filter(|o| o.status == status)
        .map(|o| o.provider.as_str())
        .collect()
}

fn outcome_label(status: PostStatus) -> &'static str {
    match status {
        PostStatus::Success => "published",
        PostStatus::Partial => "partially published",
        _ => "failed",
    }
}

/// One-line message stored and pushed to live sessions
pub fn summary(post: &Post, status: PostStatus, outcomes: &[ProviderOutcome]) -> String {
    let succeeded = providers_with(outcomes, OutcomeStatus::Succeeded);
    let failed = providers_with(outcomes, OutcomeStatus::Failed);
    let excerpt = post.excerpt(EXCERPT_CHARS);

    match status {
        PostStatus::Success => {
            format!("\"{}\" was published to {}", excerpt, succeeded.join(", "))
        }
        PostStatus::Partial => format!(
            "\"{}\" was published to {} but failed on {}",
            excerpt,
            succeeded.join(", "),
            failed.join(", ")
        ),
        _ => format!("\"{}\" could not be published to {}", excerpt, failed.join(", ")),
    }
}

/// Outcome email for `username`, naming every provider and each failure reason
pub fn render_email(
    to: &str,
    username: &str,
    post: &Post,
    status: PostStatus,
    outcomes: &[ProviderOutcome],
) -> OutcomeEmail {
    let label = outcome_label(status);
    let mut body = format!(
        "Hi {},\n\nYour post was {}.\n\nPost: \"{}\"\n\nProviders:\n",
        username,
        label,
        post.excerpt(EXCERPT_CHARS)
    );

    for outcome in outcomes {
        let _ = match (&outcome.status, &outcome.external_id) {
            (OutcomeStatus::Succeeded, Some(id)) => {
                writeln!(body, "- {}: published ({})", outcome.provider, id)
            }
            (OutcomeStatus::Succeeded, None) => writeln!(body, "- {}: published", outcome.provider),
            _ => writeln!(body, "- {}: failed", outcome.provider),
        };
    }

    let errors: Vec<&ProviderOutcome> = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .collect();
    if !errors.is_empty() {
        body.push_str("\nErrors:\n");
        for outcome in errors {
            let _ = writeln!(
                body,
                "- {}: {}",
                outcome.provider,
                outcome.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }

    OutcomeEmail {
        to: to.to_string(),
        subject: format!("Post {}", label),
        body,
    }
}
