//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use libcrosspost::billing::DbBilling;
use libcrosspost::credentials::{CredentialStore, MemoryCredentialStore};
use libcrosspost::notify::MemoryMailer;
use libcrosspost::providers::{Provider, ProviderRegistry};
use libcrosspost::service::{CrosspostService, ServiceParts};
use libcrosspost::storage::MemoryMediaStore;
use libcrosspost::types::{PlanTier, Subscription, SubscriptionStatus, User};
use libcrosspost::{Config, Database};
use tempfile::TempDir;

pub const SIGNING_KEY: &str = "current-signing-key";
pub const PREVIOUS_KEY: &str = "previous-signing-key";

pub struct TestEnv {
    pub service: CrosspostService,
    pub mailer: MemoryMailer,
    pub store: Arc<MemoryMediaStore>,
    pub credentials: Arc<MemoryCredentialStore>,
    _temp_dir: TempDir,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.publish.delay_ms = 0;
    config.retry.chunk.delay_ms = 0;
    config.triggers.enabled = true;
    config.triggers.signing_key = SIGNING_KEY.to_string();
    config.triggers.previous_signing_key = Some(PREVIOUS_KEY.to_string());
    config
}

/// Service over a temp database with `providers` registered and linked for
/// `user-1`, who has an email address.
pub async fn setup(providers: Vec<Arc<dyn Provider>>) -> TestEnv {
    setup_with_config(providers, test_config()).await
}

pub async fn setup_with_config(providers: Vec<Arc<dyn Provider>>, config: Config) -> TestEnv {
    let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
    let linked: Vec<&str> = names.iter().map(String::as_str).collect();
    build(providers, config, &linked).await
}

/// Like [`setup`], but only the `linked` providers get a credential
pub async fn setup_linked(providers: Vec<Arc<dyn Provider>>, linked: &[&str]) -> TestEnv {
    build(providers, test_config(), linked).await
}

async fn build(providers: Vec<Arc<dyn Provider>>, config: Config, linked: &[&str]) -> TestEnv {
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

    let credentials = Arc::new(MemoryCredentialStore::new());
    let mut registry = ProviderRegistry::new();
    for name in linked {
        credentials
            .link("user-1", name, "acct-1", "token-1")
            .await
            .unwrap();
    }
    for provider in providers {
        registry.register(provider);
    }

    let mailer = MemoryMailer::new();
    let store = Arc::new(MemoryMediaStore::new());
    let parts = ServiceParts {
        providers: registry,
        credentials: credentials.clone(),
        store: store.clone(),
        mailer: Arc::new(mailer.clone()),
        billing: Arc::new(DbBilling::new(db.clone())),
    };

    TestEnv {
        service: CrosspostService::from_parts(config, db, parts),
        mailer,
        store,
        credentials,
        _temp_dir: temp_dir,
    }
}

pub async fn subscribe(db: &Database, user_id: &str, tier: PlanTier, next_billing_at: i64) {
    db.upsert_subscription(&Subscription {
        id: format!("sub-{}", user_id),
        user_id: user_id.to_string(),
        tier,
        status: SubscriptionStatus::Active,
        next_billing_at,
        updated_at: chrono::Utc::now().timestamp(),
    })
    .await
    .unwrap();
}
