//! Media validation
//!
//! Checks a candidate media set against per-kind rules before anything is
//! uploaded. Rules are applied in a fixed order and the first violation
//! wins:
//!
//! 1. every file must classify as image or video by declared MIME type
//! 2. all files must share one kind
//! 3. the kind's count ceiling
//! 4. per file: concrete MIME type allowed, then size ceiling
//!
//! The numbers are defaults; `[media.providers.<name>.<kind>]` replaces the
//! rules for one provider.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{MediaAsset, MediaKind};

const MIB: u64 = 1024 * 1024;

/// Constraints for one media kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindRules {
    pub max_count: usize,
    pub allowed_types: Vec<String>,
    pub max_size_bytes: u64,
    /// Per-MIME size ceilings that replace `max_size_bytes`
    #[serde(default)]
    pub size_overrides: HashMap<String, u64>,
}

impl KindRules {
    pub fn image_default() -> Self {
        let mut size_overrides = HashMap::new();
        size_overrides.insert("image/gif".to_string(), 15 * MIB);
        Self {
            max_count: 4,
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
            ],
            max_size_bytes: 5 * MIB,
            size_overrides,
        }
    }

    pub fn video_default() -> Self {
        Self {
            max_count: 1,
            allowed_types: vec!["video/mp4".to_string()],
            max_size_bytes: 512 * MIB,
            size_overrides: HashMap::new(),
        }
    }

    fn size_limit(&self, mime: &str) -> u64 {
        self.size_overrides
            .get(mime)
            .copied()
            .unwrap_or(self.max_size_bytes)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMediaRules {
    pub image: Option<KindRules>,
    pub video: Option<KindRules>,
}

/// `[media]` configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub image: KindRules,
    pub video: KindRules,
    pub providers: HashMap<String, ProviderMediaRules>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            image: KindRules::image_default(),
            video: KindRules::video_default(),
            providers: HashMap::new(),
        }
    }
}

/// The subset of a media file the validator looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCandidate {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl MediaCandidate {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }
}

impl From<&MediaAsset> for MediaCandidate {
    fn from(asset: &MediaAsset) -> Self {
        Self {
            file_name: asset.file_name.clone(),
            mime_type: asset.mime_type.clone(),
            size_bytes: asset.size_bytes,
        }
    }
}

/// Lowercase and drop parameters (`image/png; q=1` -> `image/png`)
fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone)]
pub struct MediaValidator {
    config: MediaConfig,
}

impl MediaValidator {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Validate against the default rules
    pub fn validate(&self, files: &[MediaCandidate]) -> Result<(), ValidationError> {
        check(files, &self.config.image, &self.config.video)
    }

    /// Validate against the effective rules of one provider
    pub fn validate_for_provider(
        &self,
        provider: &str,
        files: &[MediaCandidate],
    ) -> Result<(), ValidationError> {
        let overrides = self.config.providers.get(provider);
        let image = overrides
            .and_then(|o| o.image.as_ref())
            .unwrap_or(&self.config.image);
        let video = overrides
            .and_then(|o| o.video.as_ref())
            .unwrap_or(&self.config.video);

        check(files, image, video).map_err(|e| ValidationError {
            reason: format!("{}: {}", provider, e.reason),
            ..e
        })
    }

    /// Validate against every selected provider's effective rules. The
    /// defaults are checked once for providers without an override.
    pub fn validate_for_providers(
        &self,
        providers: &[String],
        files: &[MediaCandidate],
    ) -> Result<(), ValidationError> {
        let (overridden, plain): (Vec<&String>, Vec<&String>) = providers
            .iter()
            .partition(|p| self.config.providers.contains_key(p.as_str()));
        if !plain.is_empty() || overridden.is_empty() {
            self.validate(files)?;
        }
        for provider in overridden {
            self.validate_for_provider(provider, files)?;
        }
        Ok(())
    }
}

fn check(
    files: &[MediaCandidate],
    image: &KindRules,
    video: &KindRules,
) -> Result<(), ValidationError> {
    let Some(first) = files.first() else {
        return Ok(());
    };

    let mut kinds = Vec::with_capacity(files.len());
    for file in files {
        match MediaKind::classify(&normalize_mime(&file.mime_type)) {
            Some(kind) => kinds.push(kind),
            None => {
                return Err(ValidationError::for_file(
                    &file.file_name,
                    format!("unsupported media type '{}'", file.mime_type),
                ))
            }
        }
    }

    let kind = kinds[0];
    if let Some(pos) = kinds.iter().position(|k| *k != kind) {
        return Err(ValidationError::for_file(
            &files[pos].file_name,
            format!(
                "images and videos cannot be mixed in one post ('{}' is {}, '{}' is {})",
                first.file_name, kind, files[pos].file_name, kinds[pos]
            ),
        ));
    }

    let rules = match kind {
        MediaKind::Image => image,
        MediaKind::Video => video,
    };

    if files.len() > rules.max_count {
        return Err(ValidationError::general(format!(
            "too many {} files: {} attached, at most {} allowed",
            kind,
            files.len(),
            rules.max_count
        )));
    }

    for file in files {
        let mime = normalize_mime(&file.mime_type);
        if !rules.allowed_types.iter().any(|t| t.eq_ignore_ascii_case(&mime)) {
            return Err(ValidationError::for_file(
                &file.file_name,
                format!(
                    "{} type '{}' is not allowed (allowed: {})",
                    kind,
                    mime,
                    rules.allowed_types.join(", ")
                ),
            ));
        }

        let limit = rules.size_limit(&mime);
        if file.size_bytes > limit {
            return Err(ValidationError::for_file(
                &file.file_name,
                format!(
                    "file is {} bytes, the limit for {} is {} bytes",
                    file.size_bytes, mime, limit
                ),
            ));
        }
    }

    Ok(())
}
