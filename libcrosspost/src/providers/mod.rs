//! Provider abstraction and implementations
//!
//! A provider is a third-party platform that accepts media uploads and
//! posts. Each implementation pairs a [`ChunkedUploader`] (driving the
//! platform's upload protocol) with the platform-native "create post" call.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::config::Config;
//! use libcrosspost::credentials::ProviderCredential;
//! use libcrosspost::providers::create_providers;
//!
//! # async fn example() -> libcrosspost::error::Result<()> {
//! let config = Config::load()?;
//! let registry = create_providers(&config)?;
//!
//! if let Some(x) = registry.get("x") {
//!     let credential = ProviderCredential::new("12345", "token");
//!     let id = x.publish(&credential, "Hello", &[]).await?;
//!     println!("Posted: {}", id);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::credentials::ProviderCredential;
use crate::error::{ConfigError, ProviderError, Result, ValidationError};
use crate::retry::RetryPolicy;
use crate::upload::{ChunkedUploader, UploadSettings};

pub mod linkedin;
pub mod x;

// Mock provider is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Unified interface to a publishing platform
#[async_trait]
pub trait Provider: Send + Sync {
    /// Lowercase identifier (e.g. "x", "linkedin")
    fn name(&self) -> &str;

    /// Maximum characters in a post body, `None` if unbounded
    fn character_limit(&self) -> Option<usize>;

    /// Uploader driving this provider's media protocol
    fn uploader(&self) -> &ChunkedUploader;

    /// Create the post with already-uploaded media handles.
    ///
    /// Returns the id the provider assigned to the new post.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] classified as transient (network, 5xx,
    /// 429) or permanent (rejected, revoked credential).
    async fn publish(
        &self,
        credential: &ProviderCredential,
        text: &str,
        media_ids: &[String],
    ) -> std::result::Result<String, ProviderError>;

    /// Check the post body against this provider's limits
    fn validate_content(&self, content: &str) -> std::result::Result<(), ValidationError> {
        if let Some(limit) = self.character_limit() {
            let length = content.chars().count();
            if length > limit {
                return Err(ValidationError::general(format!(
                    "{}: text is {} characters, the limit is {}",
                    self.name(),
                    length,
                    limit
                )));
            }
        }
        Ok(())
    }
}

/// Providers available to the pipeline, by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// HTTP client shared by the provider implementations
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(15))
        .user_agent(concat!("crosspost/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| {
            ConfigError::InvalidValue {
                field: "http client".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
}

/// Build every enabled provider from configuration
pub fn create_providers(config: &Config) -> Result<ProviderRegistry> {
    let client = http_client()?;
    let chunk_policy: Arc<dyn RetryPolicy> = Arc::from(config.retry.chunk.build());
    let settings = UploadSettings::from(&config.upload);
    let mut registry = ProviderRegistry::new();

    if let Some(x_config) = config.providers.x.as_ref().filter(|c| c.enabled) {
        registry.register(Arc::new(x::XProvider::new(
            client.clone(),
            x_config,
            chunk_policy.clone(),
            settings,
        )));
    }

    if let Some(linkedin_config) = config.providers.linkedin.as_ref().filter(|c| c.enabled) {
        registry.register(Arc::new(linkedin::LinkedInProvider::new(
            client.clone(),
            linkedin_config,
            chunk_policy.clone(),
            settings,
        )));
    }

    tracing::debug!(providers = ?registry.names(), "Providers configured");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::mock::MockProvider;
    use super::*;
    use crate::config::{LinkedInConfig, XConfig};

    #[test]
    fn test_registry_lookup() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(MockProvider::success("b")))
            .with(Arc::new(MockProvider::success("a")));

        assert!(registry.contains("a"));
        assert!(registry.get("c").is_none());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_validate_content_counts_chars_not_bytes() {
        let provider = MockProvider::success("short").with_character_limit(5);
        assert!(provider.validate_content("héllo").is_ok());

        let err = provider.validate_content("héllo!").unwrap_err();
        assert!(err.reason.contains("limit is 5"));
    }

    #[test]
    fn test_create_providers_only_enabled() {
        let mut config = Config::default();
        assert!(create_providers(&config).unwrap().is_empty());

        config.providers.x = Some(XConfig::default());
        config.providers.linkedin = Some(LinkedInConfig {
            enabled: false,
            ..LinkedInConfig::default()
        });
        let registry = create_providers(&config).unwrap();
        assert_eq!(registry.names(), vec!["x"]);
        assert_eq!(registry.get("x").unwrap().character_limit(), Some(280));
    }
}
