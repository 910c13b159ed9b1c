//! Scheduled trigger gateway
//!
//! Deferred and periodic jobs arrive as signed requests. The signature is
//! an HMAC-SHA256 over the raw body, checked against the current key and,
//! during rotation, the previous one. Nothing runs until it matches.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

use crate::billing::SubscriptionSweeper;
use crate::config::TriggerConfig;
use crate::db::Database;
use crate::error::{Result, StorageError, TriggerError};
use crate::orchestrator::PublishOrchestrator;
use crate::scheduling::publish_due;
use crate::storage::MediaStore;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request signature
pub const SIGNATURE_HEADER: &str = "x-crosspost-signature";

/// `sha256=<hex>` signature of `body` under `key`
pub fn sign_payload(key: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub struct SignatureVerifier {
    current: SecretString,
    previous: Option<SecretString>,
}

impl SignatureVerifier {
    pub fn new(current: SecretString, previous: Option<SecretString>) -> Self {
        Self { current, previous }
    }

    pub fn from_config(config: &TriggerConfig) -> Self {
        Self::new(config.current_key(), config.previous_key())
    }

    /// Accepts `sha256=<hex>` or bare hex
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> bool {
        let Some(signature) = signature else {
            return false;
        };
        let signature = signature.trim();
        let encoded = signature.strip_prefix("sha256=").unwrap_or(signature);
        let Ok(expected) = hex::decode(encoded) else {
            return false;
        };

        std::iter::once(&self.current)
            .chain(self.previous.as_ref())
            .any(|key| matches_key(key, body, &expected))
    }
}

fn matches_key(key: &SecretString, body: &[u8], signature: &[u8]) -> bool {
    let key = key.expose_secret();
    if key.is_empty() {
        return false;
    }
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    // constant-time comparison
    mac.verify_slice(signature).is_ok()
}

/// Deferred work named by a trigger body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum TriggerJob {
    DeleteMedia { keys: Vec<String> },
    ExpireSubscriptions,
    PublishDue,
    PublishPost { post_id: String },
}

impl TriggerJob {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerJob::DeleteMedia { .. } => "delete_media",
            TriggerJob::ExpireSubscriptions => "expire_subscriptions",
            TriggerJob::PublishDue => "publish_due",
            TriggerJob::PublishPost { .. } => "publish_post",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    pub job: &'static str,
    /// Objects deleted, subscriptions expired or posts published
    pub affected: usize,
}

pub struct TriggerGateway {
    verifier: SignatureVerifier,
    db: Database,
    store: Arc<dyn MediaStore>,
    sweeper: SubscriptionSweeper,
    orchestrator: PublishOrchestrator,
}

impl TriggerGateway {
    pub fn new(
        verifier: SignatureVerifier,
        db: Database,
        store: Arc<dyn MediaStore>,
        orchestrator: PublishOrchestrator,
    ) -> Self {
        Self {
            verifier,
            sweeper: SubscriptionSweeper::new(db.clone()),
            db,
            store,
            orchestrator,
        }
    }

    /// Verify and run one trigger
    ///
    /// # Errors
    ///
    /// `SignatureInvalid` (with no side effect) if the signature matches
    /// neither key, `MalformedPayload` if the body names no known job, and
    /// any error raised by the job itself.
    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> Result<TriggerReport> {
        if !self.verifier.verify(body, signature) {
            warn!(bytes = body.len(), "Rejected trigger with invalid signature");
            return Err(TriggerError::SignatureInvalid.into());
        }

        let job: TriggerJob = serde_json::from_slice(body)
            .map_err(|e| TriggerError::MalformedPayload(e.to_string()))?;
        let name = job.name();
        info!(job = name, "Running trigger job");

        let affected = self.run(job).await?;
        info!(job = name, affected, "Trigger job finished");
        Ok(TriggerReport {
            job: name,
            affected,
        })
    }

    async fn run(&self, job: TriggerJob) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        match job {
            TriggerJob::DeleteMedia { keys } => self.delete_media(&keys).await,
            TriggerJob::ExpireSubscriptions => Ok(self.sweeper.expire_overdue(now).await?.len()),
            TriggerJob::PublishDue => Ok(publish_due(&self.db, &self.orchestrator, now).await?.len()),
            TriggerJob::PublishPost { post_id } => {
                Ok(self.orchestrator.publish(&post_id).await?.map_or(0, |_| 1))
            }
        }
    }

    /// Delete objects and their asset records; keys already gone are skipped
    async fn delete_media(&self, keys: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            match self.store.delete(key).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(StorageError::InvalidKey(key)) => {
                    warn!(key = %key, "Skipping invalid media key");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            self.db.delete_media_assets_by_key(key).await?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(
            SecretString::from("current-key".to_string()),
            Some(SecretString::from("previous-key".to_string())),
        )
    }

    #[test]
    fn test_current_and_previous_keys_accepted() {
        let body = br#"{"job":"expire_subscriptions"}"#;
        let verifier = verifier();

        assert!(verifier.verify(body, Some(&sign_payload("current-key", body))));
        assert!(verifier.verify(body, Some(&sign_payload("previous-key", body))));
    }

    #[test]
    fn test_other_key_rejected() {
        let body = br#"{"job":"expire_subscriptions"}"#;
        assert!(!verifier().verify(body, Some(&sign_payload("stolen-key", body))));
    }

    #[test]
    fn test_bare_hex_accepted() {
        let body = b"payload";
        let signed = sign_payload("current-key", body);
        let bare = signed.strip_prefix("sha256=").unwrap();
        assert!(verifier().verify(body, Some(bare)));
    }

    #[test]
    fn test_missing_or_garbled_signature_rejected() {
        let body = b"payload";
        assert!(!verifier().verify(body, None));
        assert!(!verifier().verify(body, Some("sha256=not-hex")));
        assert!(!verifier().verify(body, Some("")));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signature = sign_payload("current-key", b"original");
        assert!(!verifier().verify(b"tampered", Some(&signature)));
    }

    #[test]
    fn test_empty_key_never_matches() {
        let verifier = SignatureVerifier::new(SecretString::from(String::new()), None);
        let body = b"payload";
        assert!(!verifier.verify(body, Some(&sign_payload("", body))));
    }

    #[test]
    fn test_job_parsing() {
        let job: TriggerJob =
            serde_json::from_str(r#"{"job":"delete_media","keys":["a/1.png","a/2.png"]}"#).unwrap();
        assert_eq!(
            job,
            TriggerJob::DeleteMedia {
                keys: vec!["a/1.png".to_string(), "a/2.png".to_string()]
            }
        );
        let job: TriggerJob = serde_json::from_str(r#"{"job":"publish_post","post_id":"p1"}"#).unwrap();
        assert_eq!(job.name(), "publish_post");
        assert!(serde_json::from_str::<TriggerJob>(r#"{"job":"reboot"}"#).is_err());
    }
}
