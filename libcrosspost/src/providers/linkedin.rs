//! LinkedIn provider: pre-signed URL media upload, Posts API

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::LinkedInConfig;
use crate::credentials::ProviderCredential;
use crate::error::ProviderError;
use crate::providers::Provider;
use crate::retry::RetryPolicy;
use crate::upload::presigned::PresignedUrlAdapter;
use crate::upload::{ChunkedUploader, UploadSettings};

pub const CHARACTER_LIMIT: usize = 3000;

pub struct LinkedInProvider {
    client: reqwest::Client,
    api_url: String,
    api_version: String,
    uploader: ChunkedUploader,
}

impl LinkedInProvider {
    pub fn new(
        client: reqwest::Client,
        config: &LinkedInConfig,
        chunk_policy: Arc<dyn RetryPolicy>,
        settings: UploadSettings,
    ) -> Self {
        let adapter = PresignedUrlAdapter::new(
            client.clone(),
            config.api_url.clone(),
            config.api_version.clone(),
        );
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            uploader: ChunkedUploader::new("linkedin", Arc::new(adapter), chunk_policy, settings),
        }
    }
}

/// `content` block for the uploaded media, if any
fn media_content(media_ids: &[String]) -> Option<Value> {
    match media_ids {
        [] => None,
        [single] => Some(json!({ "media": { "id": single } })),
        many => Some(json!({
            "multiImage": {
                "images": many.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>()
            }
        })),
    }
}

#[async_trait]
impl Provider for LinkedInProvider {
    fn name(&self) -> &str {
        "linkedin"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn uploader(&self) -> &ChunkedUploader {
        &self.uploader
    }

    async fn publish(
        &self,
        credential: &ProviderCredential,
        text: &str,
        media_ids: &[String],
    ) -> Result<String, ProviderError> {
        let mut body = json!({
            "author": credential.account_id,
            "commentary": text,
            "visibility": "PUBLIC",
            "distribution": {
                "feedDistribution": "MAIN_FEED",
                "targetEntities": [],
                "thirdPartyDistributionChannels": []
            },
            "lifecycleState": "PUBLISHED",
            "isReshareDisabledByAuthor": false
        });
        if let Some(content) = media_content(media_ids) {
            body["content"] = content;
        }

        let response = self
            .client
            .post(format!("{}/posts", self.api_url))
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .header("LinkedIn-Version", &self.api_version)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        // the new post URN comes back in a header, not the body
        let id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Rejected("response carried no x-restli-id".into()))?;

        tracing::debug!(post_id = %id, "Created post on linkedin");
        Ok(id)
    }
}
