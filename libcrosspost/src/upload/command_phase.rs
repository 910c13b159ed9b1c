//! Command-phase upload protocol
//!
//! One endpoint, driven by a `command` form field:
//!
//! - `INIT` declares size and type, returns a media id
//! - `APPEND` carries one base64 segment with its `segment_index`
//! - `FINALIZE` closes the upload, optionally reporting `processing_info`
//! - `STATUS` (GET) reports `processing_info` while the media is processed

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;

use super::{
    AssetMeta, ByteRange, ChunkAck, FinalizeOutcome, ProcessingState, SessionHandle,
    UploadAdapter, UploadResult, UploadSession,
};
use crate::credentials::ProviderCredential;
use crate::error::ProviderError;
use crate::types::MediaKind;

#[derive(Debug, Deserialize)]
struct MediaResponse {
    media_id_string: String,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

#[derive(Debug, Deserialize)]
struct ProcessingInfo {
    state: String,
    #[serde(default)]
    check_after_secs: Option<u64>,
    #[serde(default)]
    error: Option<ProcessingErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ProcessingErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl ProcessingInfo {
    fn into_state(self) -> ProcessingState {
        match self.state.as_str() {
            "succeeded" => ProcessingState::Ready,
            "failed" => {
                let reason = self
                    .error
                    .and_then(|e| e.message.or(e.name))
                    .unwrap_or_else(|| "media processing failed".to_string());
                ProcessingState::Failed(reason)
            }
            _ => ProcessingState::Processing {
                check_after: self.check_after_secs.map(Duration::from_secs),
            },
        }
    }
}

fn processing_state(info: Option<ProcessingInfo>) -> ProcessingState {
    info.map(ProcessingInfo::into_state)
        .unwrap_or(ProcessingState::Ready)
}

/// `media_category` expected by the endpoint
fn media_category(asset: &AssetMeta) -> &'static str {
    match asset.kind {
        MediaKind::Video => "tweet_video",
        MediaKind::Image if asset.mime_type.eq_ignore_ascii_case("image/gif") => "tweet_gif",
        MediaKind::Image => "tweet_image",
    }
}

pub struct CommandPhaseAdapter {
    client: reqwest::Client,
    endpoint: String,
}

impl CommandPhaseAdapter {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn send_form(
        &self,
        credential: &ProviderCredential,
        form: &[(&str, String)],
    ) -> UploadResult<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .form(form)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> UploadResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), &body))
}

#[async_trait]
impl UploadAdapter for CommandPhaseAdapter {
    async fn begin_upload(
        &self,
        credential: &ProviderCredential,
        asset: &AssetMeta,
    ) -> UploadResult<SessionHandle> {
        let response = self
            .send_form(
                credential,
                &[
                    ("command", "INIT".to_string()),
                    ("total_bytes", asset.size_bytes.to_string()),
                    ("media_type", asset.mime_type.clone()),
                    ("media_category", media_category(asset).to_string()),
                ],
            )
            .await?;
        let body: MediaResponse = response.json().await?;

        Ok(SessionHandle {
            media_id: body.media_id_string,
            upload_url: None,
        })
    }

    async fn send_chunk(
        &self,
        credential: &ProviderCredential,
        session: &UploadSession,
        range: ByteRange,
        bytes: Bytes,
    ) -> UploadResult<ChunkAck> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        self.send_form(
            credential,
            &[
                ("command", "APPEND".to_string()),
                ("media_id", session.handle.media_id.clone()),
                ("segment_index", session.chunks_acknowledged.to_string()),
                ("media_data", encoded),
            ],
        )
        .await?;

        // APPEND either takes the whole segment or fails
        Ok(ChunkAck {
            next_offset: range.end,
        })
    }

    async fn finalize(
        &self,
        credential: &ProviderCredential,
        session: &UploadSession,
    ) -> UploadResult<FinalizeOutcome> {
        let response = self
            .send_form(
                credential,
                &[
                    ("command", "FINALIZE".to_string()),
                    ("media_id", session.handle.media_id.clone()),
                ],
            )
            .await?;
        let body: MediaResponse = response.json().await?;

        Ok(FinalizeOutcome {
            media_id: body.media_id_string,
            processing: processing_state(body.processing_info),
        })
    }

    async fn poll_status(
        &self,
        credential: &ProviderCredential,
        media_id: &str,
    ) -> UploadResult<ProcessingState> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .query(&[("command", "STATUS"), ("media_id", media_id)])
            .send()
            .await?;
        let body: MediaResponse = check_status(response).await?.json().await?;

        Ok(processing_state(body.processing_info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::FixedBackoff;
    use crate::upload::{ChunkedUploader, UploadSettings};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn asset(size: u64, mime: &str, kind: MediaKind) -> AssetMeta {
        AssetMeta {
            asset_id: "asset-1".to_string(),
            file_name: "clip".to_string(),
            mime_type: mime.to_string(),
            size_bytes: size,
            kind,
        }
    }

    fn uploader(server: &MockServer, chunk_size: u64) -> ChunkedUploader {
        let adapter = CommandPhaseAdapter::new(
            reqwest::Client::new(),
            format!("{}/1.1/media/upload.json", server.uri()),
        );
        ChunkedUploader::new(
            "x",
            Arc::new(adapter),
            Arc::new(FixedBackoff::new(3, Duration::ZERO)),
            UploadSettings {
                chunk_size,
                poll_interval: Duration::ZERO,
                max_polls: 3,
            },
        )
    }

    #[test]
    fn test_media_category() {
        assert_eq!(media_category(&asset(1, "image/gif", MediaKind::Image)), "tweet_gif");
        assert_eq!(media_category(&asset(1, "image/png", MediaKind::Image)), "tweet_image");
        assert_eq!(media_category(&asset(1, "video/mp4", MediaKind::Video)), "tweet_video");
    }

    #[test]
    fn test_processing_info_mapping() {
        let pending: ProcessingInfo =
            serde_json::from_str(r#"{"state":"pending","check_after_secs":5}"#).unwrap();
        assert_eq!(
            pending.into_state(),
            ProcessingState::Processing {
                check_after: Some(Duration::from_secs(5))
            }
        );

        let failed: ProcessingInfo = serde_json::from_str(
            r#"{"state":"failed","error":{"name":"InvalidMedia","message":"Unsupported codec"}}"#,
        )
        .unwrap();
        assert_eq!(
            failed.into_state(),
            ProcessingState::Failed("Unsupported codec".to_string())
        );

        assert_eq!(processing_state(None), ProcessingState::Ready);
    }

    #[tokio::test]
    async fn test_full_command_sequence() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("authorization", "Bearer token"))
            .and(body_string_contains("command=INIT"))
            .respond_with(
                ResponseTemplate::new(202).set_body_json(serde_json::json!({"media_id_string": "710511363345354753"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(body_string_contains("command=APPEND"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(body_string_contains("command=FINALIZE"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "media_id_string": "710511363345354753",
                "processing_info": {"state": "pending", "check_after_secs": 0}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(query_param("command", "STATUS"))
            .and(query_param("media_id", "710511363345354753"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "media_id_string": "710511363345354753",
                "processing_info": {"state": "succeeded"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let uploaded = uploader(&server, 4)
            .upload(
                &ProviderCredential::new("acct", "token"),
                &asset(6, "video/mp4", MediaKind::Video),
                Bytes::from_static(b"abcdef"),
            )
            .await
            .unwrap();

        assert_eq!(uploaded.media_id, "710511363345354753");
        assert_eq!(uploaded.bytes_acknowledged, 6);
        assert_eq!(uploaded.chunks, 2);
    }

    #[tokio::test]
    async fn test_append_segments_are_indexed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_string_contains("command=INIT"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"media_id_string": "m1"})),
            )
            .mount(&server)
            .await;
        for index in 0..3 {
            Mock::given(method("POST"))
                .and(body_string_contains("command=APPEND"))
                .and(body_string_contains(format!("segment_index={}", index)))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("POST"))
            .and(body_string_contains("command=FINALIZE"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"media_id_string": "m1"})),
            )
            .mount(&server)
            .await;

        uploader(&server, 2)
            .upload(
                &ProviderCredential::new("acct", "token"),
                &asset(6, "image/png", MediaKind::Image),
                Bytes::from_static(b"abcdef"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_server_error_retried_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_string_contains("command=INIT"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"media_id_string": "m2"})),
            )
            .mount(&server)
            .await;
        // first APPEND fails once, then the general mock takes over
        Mock::given(method("POST"))
            .and(body_string_contains("command=APPEND"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("command=APPEND"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("command=FINALIZE"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"media_id_string": "m2"})),
            )
            .mount(&server)
            .await;

        let uploaded = uploader(&server, 16)
            .upload(
                &ProviderCredential::new("acct", "token"),
                &asset(3, "image/png", MediaKind::Image),
                Bytes::from_static(b"abc"),
            )
            .await
            .unwrap();
        assert_eq!(uploaded.media_id, "m2");
    }

    #[tokio::test]
    async fn test_revoked_token_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid or expired token"))
            .expect(1)
            .mount(&server)
            .await;

        let result = uploader(&server, 4)
            .upload(
                &ProviderCredential::new("acct", "token"),
                &asset(3, "image/png", MediaKind::Image),
                Bytes::from_static(b"abc"),
            )
            .await;

        assert!(matches!(result, Err(ProviderError::Authentication(_))));
    }
}
