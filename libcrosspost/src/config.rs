//! Configuration management for Crosspost
//!
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{ConfigError, Result};
use crate::media::MediaConfig;
use crate::quota::QuotaConfig;
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub triggers: TriggerConfig,
    pub quota: QuotaConfig,
    pub media: MediaConfig,
    pub upload: UploadConfig,
    pub retry: RetryConfig,
    pub providers: ProvidersConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/crosspost/crosspost.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the local object store
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "~/.local/share/crosspost/media".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub enabled: bool,
    /// Current HMAC signing key
    pub signing_key: String,
    /// Key being rotated out; still accepted while set
    pub previous_signing_key: Option<String>,
    /// Internal subscription-expiry sweep interval
    pub sweep_interval_secs: u64,
    /// Internal due-post poll interval
    pub due_poll_interval_secs: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            signing_key: String::new(),
            previous_signing_key: None,
            sweep_interval_secs: 3600,
            due_poll_interval_secs: 60,
        }
    }
}

impl TriggerConfig {
    pub fn current_key(&self) -> SecretString {
        SecretString::from(self.signing_key.clone())
    }

    pub fn previous_key(&self) -> Option<SecretString> {
        self.previous_signing_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .map(|k| SecretString::from(k.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub chunk_size_bytes: usize,
    pub status_poll_interval_ms: u64,
    pub status_max_polls: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 4 * 1024 * 1024,
            status_poll_interval_ms: 5_000,
            status_max_polls: 60,
        }
    }
}

impl UploadConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub x: Option<XConfig>,
    pub linkedin: Option<LinkedInConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XConfig {
    pub enabled: bool,
    /// Base URL of the media upload endpoint
    pub upload_url: String,
    /// Base URL of the post API
    pub api_url: String,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            upload_url: "https://upload.twitter.com/1.1/media/upload.json".to_string(),
            api_url: "https://api.twitter.com/2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkedInConfig {
    pub enabled: bool,
    pub api_url: String,
    /// Value of the `LinkedIn-Version` header
    pub api_version: String,
}

impl Default for LinkedInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.linkedin.com/rest".to_string(),
            api_version: "202401".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// When false, notification emails are only logged
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    /// Exposed only when building the SMTP credentials
    #[serde(skip_serializing)]
    pub smtp_password: Option<SecretString>,
    pub from_address: String,
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            from_address: "noreply@localhost".to_string(),
            from_name: "Crosspost".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.upload.chunk_size_bytes == 0 {
            return Err(invalid("upload.chunk_size_bytes", "must be greater than zero"));
        }
        if self.upload.status_max_polls == 0 {
            return Err(invalid("upload.status_max_polls", "must be at least 1"));
        }
        if self.retry.chunk.max_attempts == 0 {
            return Err(invalid("retry.chunk.max_attempts", "must be at least 1"));
        }
        if self.retry.publish.max_attempts == 0 {
            return Err(invalid("retry.publish.max_attempts", "must be at least 1"));
        }
        if self.triggers.enabled && self.triggers.signing_key.trim().is_empty() {
            return Err(invalid(
                "triggers.signing_key",
                "required when triggers are enabled",
            ));
        }
        if self.email.enabled && self.email.smtp_host.trim().is_empty() {
            return Err(invalid("email.smtp_host", "required when email is enabled"));
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::CrosspostError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspost").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("crosspost"))
}
