//! Per-user provider credentials
//!
//! The orchestrator resolves the post owner's credential for each selected
//! provider before starting that provider's sequence. A missing credential
//! is a permanent failure for that provider only.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::Database;

/// Access token plus the provider-side account identifier.
///
/// The token is held as a [`SecretString`] and never printed.
pub struct ProviderCredential {
    pub account_id: String,
    access_token: SecretString,
}

impl ProviderCredential {
    pub fn new(account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            access_token: SecretString::from(access_token.into()),
        }
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("account_id", &self.account_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Resolves a user's credential for a provider.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when the user has not linked that provider
    async fn credential_for(&self, user_id: &str, provider: &str)
        -> Result<Option<ProviderCredential>>;

    /// Link (or relink) an account
    async fn link(
        &self,
        user_id: &str,
        provider: &str,
        account_id: &str,
        access_token: &str,
    ) -> Result<()>;

    fn backend_name(&self) -> &str;
}

/// Credentials kept in the `provider_accounts` table
pub struct DbCredentialStore {
    db: Database,
}

impl DbCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for DbCredentialStore {
    async fn credential_for(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<ProviderCredential>> {
        Ok(self
            .db
            .get_provider_account(user_id, provider)
            .await?
            .map(|(account_id, token)| ProviderCredential::new(account_id, token)))
    }

    async fn link(
        &self,
        user_id: &str,
        provider: &str,
        account_id: &str,
        access_token: &str,
    ) -> Result<()> {
        self.db
            .upsert_provider_account(user_id, provider, account_id, access_token)
            .await?;
        tracing::info!(user_id = %user_id, provider = %provider, "Linked provider account");
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "database"
    }
}

/// In-memory store for tests
#[derive(Default, Clone)]
pub struct MemoryCredentialStore {
    accounts: Arc<RwLock<HashMap<(String, String), (String, String)>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn credential_for(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<ProviderCredential>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(&(user_id.to_string(), provider.to_string()))
            .map(|(account, token)| ProviderCredential::new(account.clone(), token.clone())))
    }

    async fn link(
        &self,
        user_id: &str,
        provider: &str,
        account_id: &str,
        access_token: &str,
    ) -> Result<()> {
        self.accounts.write().await.insert(
            (user_id.to_string(), provider.to_string()),
            (account_id.to_string(), access_token.to_string()),
        );
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_debug_redacts_token() {
        let credential = ProviderCredential::new("acct-1", "super-secret-token");
        let debug = format!("{:?}", credential);
        assert!(debug.contains("acct-1"));
        assert!(!debug.contains("super-secret-token"));
        assert_eq!(credential.bearer(), "Bearer super-secret-token");
    }

    #[tokio::test]
    async fn test_db_store_link_and_resolve() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db").to_string_lossy())
            .await
            .unwrap();
        let store = DbCredentialStore::new(db);

        assert!(store.credential_for("user-1", "x").await.unwrap().is_none());
        store.link("user-1", "x", "12345", "token").await.unwrap();

        let credential = store.credential_for("user-1", "x").await.unwrap().unwrap();
        assert_eq!(credential.account_id, "12345");
        assert_eq!(credential.access_token().expose_secret(), "token");
        assert_eq!(store.backend_name(), "database");
    }

    #[tokio::test]
    async fn test_memory_store_is_per_provider() {
        let store = MemoryCredentialStore::new();
        store.link("user-1", "x", "a", "t").await.unwrap();

        assert!(store.credential_for("user-1", "x").await.unwrap().is_some());
        assert!(store.credential_for("user-1", "linkedin").await.unwrap().is_none());
        assert!(store.credential_for("user-2", "x").await.unwrap().is_none());
    }
}
