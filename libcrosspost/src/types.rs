//! Core types for Crosspost

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a post. Once publishing starts the status is derived from
/// its provider outcomes and only the status tracker writes it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Created,
    Queued,
    Scheduled,
    Publishing,
    Success,
    Partial,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Created => "created",
            PostStatus::Queued => "queued",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Success => "success",
            PostStatus::Partial => "partial",
            PostStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Success | PostStatus::Partial | PostStatus::Failed
        )
    }

    /// Derive the post-level status from terminal provider sub-statuses.
    ///
    /// Returns `None` while any outcome is still in flight.
    pub fn aggregate<'a, I>(outcomes: I) -> Option<PostStatus>
    where
        I: IntoIterator<Item = &'a OutcomeStatus>,
    {
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for status in outcomes {
            match status {
                OutcomeStatus::Succeeded => succeeded += 1,
                OutcomeStatus::Failed => failed += 1,
                _ => return None,
            }
        }

        match (succeeded, failed) {
            (0, 0) => None,
            (_, 0) => Some(PostStatus::Success),
            (0, _) => Some(PostStatus::Failed),
            _ => Some(PostStatus::Partial),
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PostStatus::Created),
            "queued" => Ok(PostStatus::Queued),
            "scheduled" => Ok(PostStatus::Scheduled),
            "publishing" => Ok(PostStatus::Publishing),
            "success" => Ok(PostStatus::Success),
            "partial" => Ok(PostStatus::Partial),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("unknown post status '{}'", other)),
        }
    }
}

/// Sub-status of one (post, provider) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Uploading,
    Publishing,
    Succeeded,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Pending => "pending",
            OutcomeStatus::Uploading => "uploading",
            OutcomeStatus::Publishing => "publishing",
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutcomeStatus::Succeeded | OutcomeStatus::Failed)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutcomeStatus::Pending),
            "uploading" => Ok(OutcomeStatus::Uploading),
            "publishing" => Ok(OutcomeStatus::Publishing),
            "succeeded" => Ok(OutcomeStatus::Succeeded),
            "failed" => Ok(OutcomeStatus::Failed),
            other => Err(format!("unknown outcome status '{}'", other)),
        }
    }
}

/// How a failure should be treated by retry policies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
    Cancelled,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ErrorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(ErrorClass::Transient),
            "permanent" => Ok(ErrorClass::Permanent),
            "cancelled" => Ok(ErrorClass::Cancelled),
            other => Err(format!("unknown error class '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub owner_id: String,
    pub content: String,
    /// Media asset ids, in display order
    pub media_ids: Vec<String>,
    /// Target providers, deduplicated, in selection order
    pub providers: Vec<String>,
    /// Unix timestamp of the requested publish instant (None = immediate)
    pub scheduled_at: Option<i64>,
    pub status: PostStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    pub fn new(owner_id: String, content: String, providers: Vec<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        let mut unique: Vec<String> = Vec::with_capacity(providers.len());
        for provider in providers {
            if !unique.contains(&provider) {
                unique.push(provider);
            }
        }

        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            content,
            media_ids: Vec::new(),
            providers: unique,
            scheduled_at: None,
            status: PostStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_media(mut self, media_ids: Vec<String>) -> Self {
        self.media_ids = media_ids;
        self
    }

    pub fn scheduled_for(mut self, at: i64) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// First `max_chars` characters of the text, for notifications
    pub fn excerpt(&self, max_chars: usize) -> String {
        let mut chars = self.content.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}…", head)
        } else {
            head
        }
    }
}

/// Per-provider result of publishing one post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderOutcome {
    pub post_id: String,
    pub provider: String,
    pub status: OutcomeStatus,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub attempts: u32,
    /// Id the provider assigned to the published post
    pub external_id: Option<String>,
    pub updated_at: i64,
}

/// One appended row of the outcome audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeEvent {
    pub id: i64,
    pub post_id: String,
    pub provider: String,
    pub status: OutcomeStatus,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub external_id: Option<String>,
    pub recorded_at: i64,
}

/// Broad media classification used by the validator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify by declared MIME type; `None` means the type is not accepted at all.
    pub fn classify(mime_type: &str) -> Option<Self> {
        let mime = mime_type.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(MediaKind::Image)
        } else if mime.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-supplied file held by the object store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaAsset {
    pub id: String,
    pub owner_id: String,
    /// Opaque object-store key
    pub storage_key: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// True for assets produced by the media generator (counted by quota)
    pub generated: bool,
    pub created_at: i64,
}

impl MediaAsset {
    pub fn new(
        owner_id: String,
        storage_key: String,
        file_name: String,
        mime_type: String,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            storage_key,
            file_name,
            mime_type,
            size_bytes,
            generated: false,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::classify(&self.mime_type)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Pro,
    Premium,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Premium => "premium",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            "premium" => Ok(PlanTier::Premium),
            other => Err(format!("unknown plan tier '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(format!("unknown subscription status '{}'", other)),
        }
    }
}

/// Billing state mirrored from the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub tier: PlanTier,
    pub status: SubscriptionStatus,
    pub next_billing_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
}

impl NotificationKind {
    pub fn for_status(status: PostStatus) -> Self {
        match status {
            PostStatus::Success => NotificationKind::Success,
            PostStatus::Partial => NotificationKind::Warning,
            _ => NotificationKind::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(NotificationKind::Success),
            "warning" => Ok(NotificationKind::Warning),
            "error" => Ok(NotificationKind::Error),
            other => Err(format!("unknown notification kind '{}'", other)),
        }
    }
}

/// A stored user notification; also the payload of the live `notification` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(skip)]
    pub user_id: String,
    #[serde(skip)]
    pub post_id: Option<String>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: i64,
}
