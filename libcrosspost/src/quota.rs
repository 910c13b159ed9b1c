//! Quota gate: per-plan usage limits for posts, scheduled posts and
//! generated media
//!
//! Usage is counted from the database each time, over the calendar month
//! (UTC) containing "now". Two requests near the limit can both be allowed
//! before either commits; that over-allowance of one unit is accepted and
//! there is deliberately no locking here.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CrosspostError, QuotaDenied, Result};
use crate::types::{PlanTier, PostStatus};
use crate::Database;

/// What the caller is about to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOperation {
    CreatePost,
    SchedulePost,
    GenerateMedia,
}

/// A per-period ceiling. `"unlimited"` in config maps to [`Limit::Unbounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub enum Limit {
    Bounded(u32),
    Unbounded,
}

impl Limit {
    pub fn allows(&self, used: u32) -> bool {
        match self {
            Limit::Bounded(max) => used < *max,
            Limit::Unbounded => true,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Bounded(max) => write!(f, "{}", max),
            Limit::Unbounded => f.write_str("unlimited"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Count(u32),
    Word(String),
}

impl TryFrom<LimitRepr> for Limit {
    type Error = String;

    fn try_from(repr: LimitRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            LimitRepr::Count(n) => Ok(Limit::Bounded(n)),
            LimitRepr::Word(w) if w.eq_ignore_ascii_case("unlimited") => Ok(Limit::Unbounded),
            LimitRepr::Word(w) => Err(format!(
                "invalid limit '{}': expected a number or \"unlimited\"",
                w
            )),
        }
    }
}

impl From<Limit> for LimitRepr {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Bounded(n) => LimitRepr::Count(n),
            Limit::Unbounded => LimitRepr::Word("unlimited".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimits {
    pub posts: Limit,
    pub scheduled_posts: Limit,
    pub generated_media: Limit,
}

/// `[quota.<tier>]` tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub free: UsageLimits,
    pub pro: UsageLimits,
    pub premium: UsageLimits,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free: UsageLimits {
                posts: Limit::Bounded(5),
                scheduled_posts: Limit::Bounded(2),
                generated_media: Limit::Bounded(5),
            },
            pro: UsageLimits {
                posts: Limit::Bounded(100),
                scheduled_posts: Limit::Bounded(50),
                generated_media: Limit::Bounded(50),
            },
            premium: UsageLimits {
                posts: Limit::Unbounded,
                scheduled_posts: Limit::Unbounded,
                generated_media: Limit::Bounded(200),
            },
        }
    }
}

impl QuotaConfig {
    pub fn for_tier(&self, tier: PlanTier) -> &UsageLimits {
        match tier {
            PlanTier::Free => &self.free,
            PlanTier::Pro => &self.pro,
            PlanTier::Premium => &self.premium,
        }
    }
}

/// Usage for one user in the current billing window. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub tier: PlanTier,
    pub successful_posts: u32,
    pub scheduled_posts: u32,
    pub generated_media: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    Deny(QuotaDenied),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allow)
    }

    /// Turn a denial into an error for callers that want `?`
    pub fn into_result(self) -> Result<()> {
        match self {
            QuotaDecision::Allow => Ok(()),
            QuotaDecision::Deny(denied) => Err(CrosspostError::QuotaExceeded(denied)),
        }
    }
}

/// Source of the user's active plan tier (owned by the billing system)
#[async_trait]
pub trait BillingSource: Send + Sync {
    /// Tier of the user's active subscription, `None` if there is none
    async fn active_tier(&self, user_id: &str) -> Result<Option<PlanTier>>;
}

/// Start of the calendar month (UTC) containing `now`
pub fn billing_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub struct QuotaGate {
    db: Database,
    billing: Arc<dyn BillingSource>,
    limits: QuotaConfig,
}

impl QuotaGate {
    pub fn new(db: Database, billing: Arc<dyn BillingSource>, limits: QuotaConfig) -> Self {
        Self { db, billing, limits }
    }

    pub async fn check(&self, user_id: &str, operation: QuotaOperation) -> Result<QuotaDecision> {
        self.check_at(user_id, operation, Utc::now()).await
    }

    pub async fn snapshot(&self, user_id: &str, now: DateTime<Utc>) -> Result<QuotaSnapshot> {
        let tier = self
            .billing
            .active_tier(user_id)
            .await?
            .unwrap_or(PlanTier::Free);
        let since = billing_window_start(now).timestamp();

        let successful_posts = self
            .db
            .count_posts_since(user_id, &[PostStatus::Success, PostStatus::Partial], since)
            .await?;
        let scheduled_posts = self
            .db
            .count_posts_since(user_id, &[PostStatus::Scheduled], since)
            .await?;
        let generated_media = self.db.count_generated_media_since(user_id, since).await?;

        Ok(QuotaSnapshot {
            tier,
            successful_posts,
            scheduled_posts,
            generated_media,
        })
    }

    pub async fn check_at(
        &self,
        user_id: &str,
        operation: QuotaOperation,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision> {
        let snapshot = self.snapshot(user_id, now).await?;
        let decision = decide(&snapshot, self.limits.for_tier(snapshot.tier), operation);

        if let QuotaDecision::Deny(denied) = &decision {
            tracing::info!(
                user_id = %user_id,
                tier = %snapshot.tier,
                limit = denied.limit,
                used = denied.used,
                "Quota denied"
            );
        }

        Ok(decision)
    }
}

/// Compare a snapshot with the tier's limits
pub fn decide(
    snapshot: &QuotaSnapshot,
    limits: &UsageLimits,
    operation: QuotaOperation,
) -> QuotaDecision {
    let mut checks: Vec<(&'static str, Limit, u32)> = Vec::with_capacity(2);
    match operation {
        QuotaOperation::CreatePost => {
            checks.push(("post", limits.posts, snapshot.successful_posts));
        }
        QuotaOperation::SchedulePost => {
            checks.push((
                "scheduled post",
                limits.scheduled_posts,
                snapshot.scheduled_posts,
            ));
            checks.push(("post", limits.posts, snapshot.successful_posts));
        }
        QuotaOperation::GenerateMedia => {
            checks.push((
                "generated media",
                limits.generated_media,
                snapshot.generated_media,
            ));
        }
    }

    for (name, limit, used) in checks {
        if let Limit::Bounded(max) = limit {
            if !limit.allows(used) {
                return QuotaDecision::Deny(QuotaDenied {
                    tier: snapshot.tier.to_string(),
                    limit: name,
                    max,
                    used,
                });
            }
        }
    }

    QuotaDecision::Allow
}
