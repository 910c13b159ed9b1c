//! Service layer for crosspost
//!
//! `CrosspostService` wires the pipeline together once so the CLI, the
//! daemon and tests all drive the same components:
//!
//! - `PostingService`: pre-flight checks and submission
//! - `PublishOrchestrator`: provider fan-out and abort
//! - `NotificationDispatcher`: stored, emailed and live notifications
//! - `TriggerGateway`: signed deferred jobs
//!
//! # Example
//!
//! ```no_run
//! use libcrosspost::service::CrosspostService;
//! use libcrosspost::service::posting::SubmitRequest;
//!
//! # async fn example() -> libcrosspost::Result<()> {
//! let service = CrosspostService::new().await?;
//!
//! let submission = service
//!     .posting()
//!     .submit(SubmitRequest {
//!         owner_id: "user-1".to_string(),
//!         content: "Shipping today".to_string(),
//!         providers: vec!["x".to_string(), "linkedin".to_string()],
//!         media_ids: vec![],
//!         scheduled_at: None,
//!     })
//!     .await?;
//! println!("{} -> {}", submission.post_id, submission.status);
//! # Ok(())
//! # }
//! ```

pub mod posting;

use std::sync::Arc;

use crate::billing::{DbBilling, SubscriptionSweeper};
use crate::credentials::{CredentialStore, DbCredentialStore};
use crate::media::MediaValidator;
use crate::notify::{create_mailer, ConnectionRegistry, Mailer, NotificationDispatcher};
use crate::orchestrator::PublishOrchestrator;
use crate::providers::{create_providers, ProviderRegistry};
use crate::quota::{BillingSource, QuotaGate};
use crate::retry::RetryPolicy;
use crate::storage::{LocalMediaStore, MediaStore};
use crate::trigger::{SignatureVerifier, TriggerGateway};
use crate::{Config, Database, Result};

use self::posting::PostingService;

/// Components that differ between production and tests
pub struct ServiceParts {
    pub providers: ProviderRegistry,
    pub credentials: Arc<dyn CredentialStore>,
    pub store: Arc<dyn MediaStore>,
    pub mailer: Arc<dyn Mailer>,
    pub billing: Arc<dyn BillingSource>,
}

/// Main service facade
///
/// All sub-services share one [`Database`] handle and one
/// [`ConnectionRegistry`], so a notification produced by any entry point
/// reaches every live session of its user.
#[derive(Clone)]
pub struct CrosspostService {
    db: Database,
    config: Arc<Config>,
    posting: PostingService,
    orchestrator: PublishOrchestrator,
    notifications: Arc<NotificationDispatcher>,
    connections: ConnectionRegistry,
    triggers: Arc<TriggerGateway>,
    sweeper: SubscriptionSweeper,
}

impl CrosspostService {
    /// Load configuration from the default location and build the service
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Build the production service: SQLite state, local media storage,
    /// configured providers and SMTP (or log-only) email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated, a
    /// provider HTTP client cannot be built, or the SMTP settings are invalid.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let db = Database::new(&config.database_path()).await?;

        let parts = ServiceParts {
            providers: create_providers(&config)?,
            credentials: Arc::new(DbCredentialStore::new(db.clone())),
            store: Arc::new(LocalMediaStore::from_config_path(&config.storage.root)),
            mailer: create_mailer(&config.email)?,
            billing: Arc::new(DbBilling::new(db.clone())),
        };
        Ok(Self::from_parts(config, db, parts))
    }

    /// Build the service around an open database and injected components
    pub fn from_parts(config: Config, db: Database, parts: ServiceParts) -> Self {
        let connections = ConnectionRegistry::new();
        let notifications = Arc::new(NotificationDispatcher::new(
            db.clone(),
            parts.mailer,
            connections.clone(),
        ));

        let policy: Arc<dyn RetryPolicy> = Arc::from(config.retry.publish.build());
        let orchestrator = PublishOrchestrator::new(
            db.clone(),
            parts.providers,
            parts.credentials,
            parts.store.clone(),
            policy,
            notifications.clone(),
        );

        let quota = Arc::new(QuotaGate::new(
            db.clone(),
            parts.billing,
            config.quota.clone(),
        ));
        let posting = PostingService::new(
            db.clone(),
            orchestrator.clone(),
            quota,
            MediaValidator::new(config.media.clone()),
        );

        let triggers = Arc::new(TriggerGateway::new(
            SignatureVerifier::from_config(&config.triggers),
            db.clone(),
            parts.store,
            orchestrator.clone(),
        ));

        Self {
            sweeper: SubscriptionSweeper::new(db.clone()),
            db,
            config: Arc::new(config),
            posting,
            orchestrator,
            notifications,
            connections,
            triggers,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn posting(&self) -> &PostingService {
        &self.posting
    }

    pub fn orchestrator(&self) -> &PublishOrchestrator {
        &self.orchestrator
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    /// Live sessions, shared with the notification dispatcher
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn triggers(&self) -> Arc<TriggerGateway> {
        self.triggers.clone()
    }

    pub fn sweeper(&self) -> &SubscriptionSweeper {
        &self.sweeper
    }
}

#[cfg(test)]
mod tests {
    use super::posting::{GeneratedMediaRequest, SubmitRequest};
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::error::CrosspostError;
    use crate::notify::MemoryMailer;
    use crate::quota::Limit;
    use crate::providers::mock::MockProvider;
    use crate::storage::MemoryMediaStore;
    use crate::types::{PlanTier, PostStatus, Subscription, SubscriptionStatus, User};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        service: CrosspostService,
        mailer: MemoryMailer,
    }

    async fn fixture(providers: ProviderRegistry) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        db.insert_user(&User {
            id: "user-1".to_string(),
            username: "ada".to_string(),
            email: Some("ada@example.com".to_string()),
            created_at: 0,
        })
        .await
        .unwrap();

        let credentials = MemoryCredentialStore::new();
        for name in providers.names() {
            credentials
                .link("user-1", &name, "acct", "token")
                .await
                .unwrap();
        }

        let mailer = MemoryMailer::new();
        let mut config = Config::default();
        config.retry.publish.delay_ms = 0;
        let parts = ServiceParts {
            providers,
            credentials: Arc::new(credentials),
            store: Arc::new(MemoryMediaStore::new()),
            mailer: Arc::new(mailer.clone()),
            billing: Arc::new(DbBilling::new(db.clone())),
        };
        Fixture {
            service: CrosspostService::from_parts(config, db, parts),
            mailer,
            _temp_dir: temp_dir,
        }
    }

    fn request(content: &str, providers: &[&str]) -> SubmitRequest {
        SubmitRequest {
            owner_id: "user-1".to_string(),
            content: content.to_string(),
            providers: providers.iter().map(|p| p.to_string()).collect(),
            media_ids: vec![],
            scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn test_submit_publishes_immediately() {
        let fx = fixture(ProviderRegistry::new().with(Arc::new(MockProvider::success("a")))).await;

        let submission = fx
            .service
            .posting()
            .submit(request("hello", &["a"]))
            .await
            .unwrap();

        assert_eq!(submission.status, PostStatus::Success);
        assert!(submission.report.is_some());
        assert_eq!(fx.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_provider() {
        let fx = fixture(ProviderRegistry::new().with(Arc::new(MockProvider::success("a")))).await;

        let err = fx
            .service
            .posting()
            .submit(request("hello", &["a", "myspace"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CrosspostError::InvalidInput(_)));
        assert!(err.to_string().contains("myspace"));
    }

    #[tokio::test]
    async fn test_submit_rejects_over_limit_text_before_creating_post() {
        let provider = MockProvider::success("a").with_character_limit(10);
        let fx = fixture(ProviderRegistry::new().with(Arc::new(provider))).await;

        let err = fx
            .service
            .posting()
            .submit(request("this is well over ten characters", &["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CrosspostError::Validation(_)));
        assert!(fx
            .service
            .database()
            .list_posts_by_owner("user-1", 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_submit_schedules_future_post() {
        let fx = fixture(ProviderRegistry::new().with(Arc::new(MockProvider::success("a")))).await;

        let mut req = request("later", &["a"]);
        req.scheduled_at = Some(Utc::now() + Duration::hours(1));
        let submission = fx.service.posting().submit(req).await.unwrap();

        assert_eq!(submission.status, PostStatus::Scheduled);
        assert!(submission.report.is_none());
        assert!(fx.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_free_tier_post_quota_enforced() {
        let fx = fixture(ProviderRegistry::new().with(Arc::new(MockProvider::success("a")))).await;
        let Limit::Bounded(limit) = fx.service.config().quota.free.posts else {
            panic!("free tier posts should be bounded");
        };

        for i in 0..limit {
            fx.service
                .posting()
                .submit(request(&format!("post {}", i), &["a"]))
                .await
                .unwrap();
        }
        let err = fx
            .service
            .posting()
            .submit(request("one too many", &["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CrosspostError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_generated_media_counts_against_plan() {
        let mut fx = fixture(ProviderRegistry::new()).await;
        let mut config = fx.service.config().clone();
        config.quota.free.generated_media = Limit::Bounded(1);
        let db = fx.service.database().clone();
        fx.service = CrosspostService::from_parts(
            config,
            db.clone(),
            ServiceParts {
                providers: ProviderRegistry::new(),
                credentials: Arc::new(MemoryCredentialStore::new()),
                store: Arc::new(MemoryMediaStore::new()),
                mailer: Arc::new(MemoryMailer::new()),
                billing: Arc::new(DbBilling::new(db.clone())),
            },
        );
        let generated = |key: &str| GeneratedMediaRequest {
            owner_id: "user-1".to_string(),
            storage_key: key.to_string(),
            file_name: "gen.png".to_string(),
            mime_type: "image/png".to_string(),
            size_bytes: 2048,
        };

        let asset = fx
            .service
            .posting()
            .register_generated_media(generated("user-1/gen-1.png"))
            .await
            .unwrap();
        assert!(asset.generated);
        let err = fx
            .service
            .posting()
            .register_generated_media(generated("user-1/gen-2.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, CrosspostError::QuotaExceeded(_)));

        db.upsert_subscription(&Subscription {
            id: "sub-1".to_string(),
            user_id: "user-1".to_string(),
            tier: PlanTier::Pro,
            status: SubscriptionStatus::Active,
            next_billing_at: Utc::now().timestamp() + 86_400,
            updated_at: 0,
        })
        .await
        .unwrap();
        fx.service
            .posting()
            .register_generated_media(generated("user-1/gen-2.png"))
            .await
            .unwrap();
    }
}
