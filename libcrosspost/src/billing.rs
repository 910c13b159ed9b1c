//! Effects of the external billing lifecycle
//!
//! Only two facts are consumed: a user's active plan tier (for quota) and
//! the expiry of subscriptions whose billing instant has passed.

use async_trait::async_trait;
use tracing::info;

use crate::db::Database;
use crate::error::Result;
use crate::quota::BillingSource;
use crate::types::PlanTier;

/// Plan tiers read from the `subscriptions` table
#[derive(Clone)]
pub struct DbBilling {
    db: Database,
}

impl DbBilling {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BillingSource for DbBilling {
    async fn active_tier(&self, user_id: &str) -> Result<Option<PlanTier>> {
        self.db.active_tier(user_id).await
    }
}

/// Expires overdue subscriptions. Safe to run from the periodic scheduler
/// and from ad hoc triggers at the same time.
#[derive(Clone)]
pub struct SubscriptionSweeper {
    db: Database,
}

impl SubscriptionSweeper {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the ids that moved to expired on this call
    pub async fn expire_overdue(&self, now: i64) -> Result<Vec<String>> {
        let expired = self.db.expire_overdue_subscriptions(now).await?;
        if expired.is_empty() {
            tracing::debug!("Subscription sweep found nothing overdue");
        } else {
            info!(count = expired.len(), ids = ?expired, "Expired overdue subscriptions");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Subscription, SubscriptionStatus};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        (temp_dir, db)
    }

    fn subscription(id: &str, user: &str, tier: PlanTier, next_billing_at: i64) -> Subscription {
        Subscription {
            id: id.to_string(),
            user_id: user.to_string(),
            tier,
            status: SubscriptionStatus::Active,
            next_billing_at,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (_dir, db) = setup().await;
        let now = 1_700_000_000;
        db.upsert_subscription(&subscription("s1", "u1", PlanTier::Pro, now - 10))
            .await
            .unwrap();
        db.upsert_subscription(&subscription("s2", "u2", PlanTier::Premium, now + 3600))
            .await
            .unwrap();

        let sweeper = SubscriptionSweeper::new(db.clone());
        assert_eq!(sweeper.expire_overdue(now).await.unwrap(), vec!["s1"]);
        assert!(sweeper.expire_overdue(now).await.unwrap().is_empty());

        let s1 = db.get_subscription("s1").await.unwrap().unwrap();
        assert_eq!(s1.status, SubscriptionStatus::Expired);
        let s2 = db.get_subscription("s2").await.unwrap().unwrap();
        assert_eq!(s2.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_expired_subscription_drops_tier() {
        let (_dir, db) = setup().await;
        let now = 1_700_000_000;
        db.upsert_subscription(&subscription("s1", "u1", PlanTier::Premium, now - 1))
            .await
            .unwrap();

        let billing = DbBilling::new(db.clone());
        assert_eq!(billing.active_tier("u1").await.unwrap(), Some(PlanTier::Premium));

        SubscriptionSweeper::new(db).expire_overdue(now).await.unwrap();
        assert_eq!(billing.active_tier("u1").await.unwrap(), None);
    }
}
