//! Error types for Crosspost

use thiserror::Error;

use crate::types::ErrorClass;

pub type Result<T> = std::result::Result<T, CrosspostError>;

#[derive(Error, Debug)]
pub enum CrosspostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(#[from] QuotaDenied),

    #[error("Media validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Trigger rejected: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CrosspostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosspostError::InvalidInput(_)
            | CrosspostError::Validation(_)
            | CrosspostError::QuotaExceeded(_) => 3,
            CrosspostError::Provider(ProviderError::Authentication(_))
            | CrosspostError::Trigger(TriggerError::SignatureInvalid) => 2,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Failure reported by a provider API, classified for retry decisions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Media processing did not finish: {0}")]
    ProcessingTimeout(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Media processing failed: {0}")]
    ProcessingFailed(String),

    #[error("No linked account: {0}")]
    NotLinked(String),
}

impl ProviderError {
    /// Transient failures are worth retrying; everything else is final.
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Network(_)
            | ProviderError::RateLimit(_)
            | ProviderError::Server { .. }
            | ProviderError::ProcessingTimeout(_) => ErrorClass::Transient,
            ProviderError::Authentication(_)
            | ProviderError::Rejected(_)
            | ProviderError::UnsupportedMedia(_)
            | ProviderError::ProcessingFailed(_)
            | ProviderError::NotLinked(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Map a non-success HTTP response from a provider API
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            let excerpt: String = body.chars().take(300).collect();
            format!("HTTP {}: {}", status, excerpt)
        };

        match status {
            408 => ProviderError::Network(message),
            429 => ProviderError::RateLimit(message),
            401 | 403 => ProviderError::Authentication(message),
            413 | 415 => ProviderError::UnsupportedMedia(message),
            500..=599 => ProviderError::Server { status, message },
            _ => ProviderError::Rejected(message),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Rejected(format!("unexpected response body: {}", err))
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Terminal failure of one provider sequence, stored on its outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Upload failed: {0}")]
    UploadFailed(ProviderError),

    #[error("Publish failed: {0}")]
    PublishFailed(ProviderError),

    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("Cancelled by user")]
    Cancelled,
}

impl PublishError {
    /// An upload only fails after the uploader has spent its own retries,
    /// so it is final regardless of the underlying error.
    pub fn class(&self) -> ErrorClass {
        match self {
            PublishError::UploadFailed(_) => ErrorClass::Permanent,
            PublishError::PublishFailed(e) => e.class(),
            PublishError::MediaUnavailable(_) => ErrorClass::Permanent,
            PublishError::Cancelled => ErrorClass::Cancelled,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A media file broke one of the validator's rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}{}", .file_name.as_ref().map(|f| format!(" (file: {})", f)).unwrap_or_default())]
pub struct ValidationError {
    pub file_name: Option<String>,
    pub reason: String,
}

impl ValidationError {
    pub fn for_file(file_name: &str, reason: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.to_string()),
            reason: reason.into(),
        }
    }

    pub fn general(reason: impl Into<String>) -> Self {
        Self {
            file_name: None,
            reason: reason.into(),
        }
    }
}

/// The quota gate said no. Not a fault; callers render it as a limit message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{limit} limit of {max} reached for the {tier} plan ({used} used this period)")]
pub struct QuotaDenied {
    pub tier: String,
    pub limit: &'static str,
    pub max: u32,
    pub used: u32,
}

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("signature missing or invalid")]
    SignatureInvalid,

    #[error("malformed trigger payload: {0}")]
    MalformedPayload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = CrosspostError::InvalidInput("Empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_quota_and_validation() {
        let quota = CrosspostError::QuotaExceeded(QuotaDenied {
            tier: "free".to_string(),
            limit: "post",
            max: 5,
            used: 5,
        });
        assert_eq!(quota.exit_code(), 3);

        let validation = CrosspostError::Validation(ValidationError::general("mixed media"));
        assert_eq!(validation.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_and_signature() {
        let auth = CrosspostError::Provider(ProviderError::Authentication("revoked".to_string()));
        assert_eq!(auth.exit_code(), 2);

        let signature = CrosspostError::Trigger(TriggerError::SignatureInvalid);
        assert_eq!(signature.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_runtime_errors() {
        let network = CrosspostError::Provider(ProviderError::Network("timeout".to_string()));
        assert_eq!(network.exit_code(), 1);

        let config = CrosspostError::Config(ConfigError::MissingField("database.path".to_string()));
        assert_eq!(config.exit_code(), 1);
    }

    #[test]
    fn test_provider_error_classification() {
        assert_eq!(ProviderError::Network("x".into()).class(), ErrorClass::Transient);
        assert_eq!(ProviderError::RateLimit("x".into()).class(), ErrorClass::Transient);
        assert_eq!(
            ProviderError::Server {
                status: 503,
                message: "unavailable".into()
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            ProviderError::ProcessingTimeout("x".into()).class(),
            ErrorClass::Transient
        );

        assert_eq!(ProviderError::Authentication("x".into()).class(), ErrorClass::Permanent);
        assert_eq!(ProviderError::Rejected("x".into()).class(), ErrorClass::Permanent);
        assert_eq!(ProviderError::UnsupportedMedia("x".into()).class(), ErrorClass::Permanent);
        assert_eq!(ProviderError::ProcessingFailed("x".into()).class(), ErrorClass::Permanent);
        assert_eq!(ProviderError::NotLinked("x".into()).class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_provider_error_from_http_status() {
        assert!(matches!(
            ProviderError::from_status(429, ""),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            ProviderError::from_status(503, "down"),
            ProviderError::Server { status: 503, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(401, "expired token"),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            ProviderError::from_status(415, ""),
            ProviderError::UnsupportedMedia(_)
        ));
        assert!(matches!(
            ProviderError::from_status(422, "duplicate"),
            ProviderError::Rejected(_)
        ));
        assert!(ProviderError::from_status(408, "").is_transient());
        assert_eq!(
            ProviderError::from_status(400, "  bad field ").to_string(),
            "Request rejected: HTTP 400: bad field"
        );
    }

    #[test]
    fn test_publish_error_class() {
        let exhausted = PublishError::UploadFailed(ProviderError::RateLimit("slow down".into()));
        assert_eq!(exhausted.class(), ErrorClass::Permanent);

        let transient = PublishError::PublishFailed(ProviderError::Network("reset".into()));
        assert_eq!(transient.class(), ErrorClass::Transient);

        let permanent = PublishError::PublishFailed(ProviderError::Rejected("dup".into()));
        assert_eq!(permanent.class(), ErrorClass::Permanent);

        assert_eq!(PublishError::Cancelled.class(), ErrorClass::Cancelled);
    }

    #[test]
    fn test_validation_error_names_file() {
        let error = ValidationError::for_file("clip.mov", "unsupported video type video/quicktime");
        assert_eq!(
            error.to_string(),
            "unsupported video type video/quicktime (file: clip.mov)"
        );

        let general = ValidationError::general("images and videos cannot be mixed");
        assert_eq!(general.to_string(), "images and videos cannot be mixed");
    }

    #[test]
    fn test_quota_denied_message_names_limit() {
        let denied = QuotaDenied {
            tier: "free".to_string(),
            limit: "scheduled post",
            max: 2,
            used: 2,
        };
        let message = CrosspostError::from(denied).to_string();
        assert_eq!(
            message,
            "Quota exceeded: scheduled post limit of 2 reached for the free plan (2 used this period)"
        );
    }

    #[test]
    fn test_error_message_formatting_provider() {
        let error = CrosspostError::Provider(ProviderError::Server {
            status: 502,
            message: "bad gateway".to_string(),
        });
        assert_eq!(error.to_string(), "Provider error: Server error (502): bad gateway");
    }

    #[test]
    fn test_provider_error_clone() {
        let original = ProviderError::Network("Connection failed".to_string());
        let cloned = original.clone();
        assert_eq!(original, cloned);
    }
}
