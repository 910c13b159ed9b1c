//! X provider: command-phase media upload, JSON post creation

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::XConfig;
use crate::credentials::ProviderCredential;
use crate::error::ProviderError;
use crate::providers::Provider;
use crate::retry::RetryPolicy;
use crate::upload::command_phase::CommandPhaseAdapter;
use crate::upload::{ChunkedUploader, UploadSettings};

pub const CHARACTER_LIMIT: usize = 280;

#[derive(Debug, Deserialize)]
struct CreatedPost {
    data: CreatedPostData,
}

#[derive(Debug, Deserialize)]
struct CreatedPostData {
    id: String,
}

pub struct XProvider {
    client: reqwest::Client,
    api_url: String,
    uploader: ChunkedUploader,
}

impl XProvider {
    pub fn new(
        client: reqwest::Client,
        config: &XConfig,
        chunk_policy: Arc<dyn RetryPolicy>,
        settings: UploadSettings,
    ) -> Self {
        let adapter = CommandPhaseAdapter::new(client.clone(), config.upload_url.clone());
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            uploader: ChunkedUploader::new("x", Arc::new(adapter), chunk_policy, settings),
        }
    }
}

#[async_trait]
impl Provider for XProvider {
    fn name(&self) -> &str {
        "x"
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
        let mut body = json!({ "text": text });
        if !media_ids.is_empty() {
            body["media"] = json!({ "media_ids": media_ids });
        }

        let response = self
            .client
            .post(format!("{}/tweets", self.api_url))
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        let created: CreatedPost = response.json().await?;
        tracing::debug!(post_id = %created.data.id, "Created post on x");
        Ok(created.data.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::FixedBackoff;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> XProvider {
        let config = XConfig {
            enabled: true,
            upload_url: format!("{}/1.1/media/upload.json", server.uri()),
            api_url: format!("{}/2", server.uri()),
        };
        XProvider::new(
            reqwest::Client::new(),
            &config,
            Arc::new(FixedBackoff::new(3, Duration::ZERO)),
            UploadSettings {
                chunk_size: 1024,
                poll_interval: Duration::ZERO,
                max_polls: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_publish_with_media() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(header("authorization", "Bearer token"))
            .and(body_json(serde_json::json!({
                "text": "Hello",
                "media": {"media_ids": ["111", "222"]}
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"data": {"id": "1445880548472328192", "text": "Hello"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = provider(&server)
            .publish(
                &ProviderCredential::new("acct", "token"),
                "Hello",
                &["111".to_string(), "222".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(id, "1445880548472328192");
    }

    #[tokio::test]
    async fn test_publish_text_only_omits_media() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(body_json(serde_json::json!({"text": "Just text"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"data": {"id": "9"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = provider(&server)
            .publish(&ProviderCredential::new("acct", "token"), "Just text", &[])
            .await
            .unwrap();
        assert_eq!(id, "9");
    }

    #[tokio::test]
    async fn test_publish_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .publish(&ProviderCredential::new("acct", "token"), "Hi", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimit(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_character_limit() {
        let config = XConfig::default();
        let provider = XProvider::new(
            reqwest::Client::new(),
            &config,
            Arc::new(FixedBackoff::new(1, Duration::ZERO)),
            UploadSettings {
                chunk_size: 1,
                poll_interval: Duration::ZERO,
                max_polls: 1,
            },
        );
        assert!(provider.validate_content(&"a".repeat(280)).is_ok());
        assert!(provider.validate_content(&"a".repeat(281)).is_err());
    }
}
