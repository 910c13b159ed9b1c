//! Pre-signed URL upload protocol
//!
//! `initializeUpload` returns a one-time upload URL and the asset URN. The
//! bytes are then `PUT` to that URL in ranges described by `Content-Range`.
//! A `308` response means the upload is incomplete and its `Range` header
//! says how much was stored; `200`/`201` means the range was accepted.
//! Videos are finalized explicitly and then polled until available.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{
    AssetMeta, ByteRange, ChunkAck, FinalizeOutcome, ProcessingState, SessionHandle,
    UploadAdapter, UploadResult, UploadSession,
};
use crate::credentials::ProviderCredential;
use crate::error::ProviderError;
use crate::types::MediaKind;

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    value: InitializeValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeValue {
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    upload_instructions: Vec<UploadInstruction>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    video: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadInstruction {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct AssetStatus {
    status: String,
}

/// Parse a `Range: bytes=0-N` header into the next offset (`N + 1`)
pub(crate) fn parse_range_header(value: &str) -> Option<u64> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (_, end) = spec.split_once('-')?;
    end.trim().parse::<u64>().ok()?.checked_add(1)
}

fn asset_collection(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "images",
        MediaKind::Video => "videos",
    }
}

fn is_video_urn(urn: &str) -> bool {
    urn.contains(":video:")
}

pub struct PresignedUrlAdapter {
    client: reqwest::Client,
    api_url: String,
    api_version: String,
}

impl PresignedUrlAdapter {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
        }
    }

    fn api_request(
        &self,
        method: reqwest::Method,
        path: &str,
        credential: &ProviderCredential,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .header("LinkedIn-Version", &self.api_version)
            .header("X-Restli-Protocol-Version", "2.0.0")
    }
}

async fn error_for(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ProviderError::from_status(status, &body)
}

#[async_trait]
impl UploadAdapter for PresignedUrlAdapter {
    async fn begin_upload(
        &self,
        credential: &ProviderCredential,
        asset: &AssetMeta,
    ) -> UploadResult<SessionHandle> {
        let collection = asset_collection(asset.kind);
        let mut request = json!({ "owner": credential.account_id });
        if asset.kind == MediaKind::Video {
            request["fileSizeBytes"] = json!(asset.size_bytes);
            request["uploadCaptions"] = json!(false);
            request["uploadThumbnail"] = json!(false);
        }

        let response = self
            .api_request(
                reqwest::Method::POST,
                &format!("/{}?action=initializeUpload", collection),
                credential,
            )
            .json(&json!({ "initializeUploadRequest": request }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let body: InitializeResponse = response.json().await?;
        let value = body.value;
        let upload_url = value
            .upload_url
            .or_else(|| value.upload_instructions.into_iter().next().map(|i| i.upload_url))
            .ok_or_else(|| ProviderError::Rejected("initializeUpload returned no upload URL".into()))?;
        let media_id = value
            .image
            .or(value.video)
            .ok_or_else(|| ProviderError::Rejected("initializeUpload returned no asset URN".into()))?;

        Ok(SessionHandle {
            media_id,
            upload_url: Some(upload_url),
        })
    }

    async fn send_chunk(
        &self,
        credential: &ProviderCredential,
        session: &UploadSession,
        range: ByteRange,
        bytes: Bytes,
    ) -> UploadResult<ChunkAck> {
        let url = session
            .handle
            .upload_url
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("session has no upload URL".into()))?;

        let response = self
            .client
            .put(url)
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(
                reqwest::header::CONTENT_RANGE,
                range.content_range(session.total_bytes()),
            )
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            // 308 Resume Incomplete: Range says what was stored, none if absent
            let stored = match response.headers().get(reqwest::header::RANGE) {
                None => range.start,
                Some(value) => value
                    .to_str()
                    .ok()
                    .and_then(parse_range_header)
                    .ok_or_else(|| {
                        ProviderError::Rejected(format!("malformed Range header {:?}", value))
                    })?,
            };
            return Ok(ChunkAck {
                next_offset: stored.min(range.end),
            });
        }
        if !status.is_success() {
            return Err(error_for(response).await);
        }

        Ok(ChunkAck {
            next_offset: range.end,
        })
    }

    async fn finalize(
        &self,
        credential: &ProviderCredential,
        session: &UploadSession,
    ) -> UploadResult<FinalizeOutcome> {
        let media_id = session.handle.media_id.clone();
        if session.asset.kind == MediaKind::Image {
            return Ok(FinalizeOutcome {
                media_id,
                processing: ProcessingState::Ready,
            });
        }

        let response = self
            .api_request(
                reqwest::Method::POST,
                "/videos?action=finalizeUpload",
                credential,
            )
            .json(&json!({
                "finalizeUploadRequest": {
                    "video": media_id,
                    "uploadToken": "",
                    "uploadedPartIds": []
                }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        Ok(FinalizeOutcome {
            media_id,
            processing: ProcessingState::Processing { check_after: None },
        })
    }

    async fn poll_status(
        &self,
        credential: &ProviderCredential,
        media_id: &str,
    ) -> UploadResult<ProcessingState> {
        let collection = if is_video_urn(media_id) {
            "videos"
        } else {
            "images"
        };
        let response = self
            .api_request(
                reqwest::Method::GET,
                &format!("/{}/{}", collection, media_id),
                credential,
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let body: AssetStatus = response.json().await?;
        Ok(match body.status.as_str() {
            "AVAILABLE" => ProcessingState::Ready,
            "PROCESSING_FAILED" => {
                ProcessingState::Failed(format!("{} processing failed", media_id))
            }
            _ => ProcessingState::Processing { check_after: None },
        })
    }
}
