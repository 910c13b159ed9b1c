//! Outcome email delivery over SMTP

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::EmailConfig;
use crate::error::{ConfigError, CrosspostError, Result};

/// A rendered outcome email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutcomeEmail) -> Result<()>;
}

/// Sends through an SMTP relay with STARTTLS
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e: lettre::address::AddressError| ConfigError::InvalidValue {
                field: "email.from_address".to_string(),
                reason: e.to_string(),
            })?;

        let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| ConfigError::InvalidValue {
                field: "email.smtp_host".to_string(),
                reason: e.to_string(),
            })?
            .port(config.smtp_port);

        let builder = match (&config.smtp_username, &config.smtp_password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(
                    user.clone(),
                    password.expose_secret().to_string(),
                ))
            }
            _ => builder,
        };

        info!(host = %config.smtp_host, port = config.smtp_port, "Email delivery initialized (SMTP with STARTTLS)");

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutcomeEmail) -> Result<()> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| CrosspostError::Notification(format!("invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| CrosspostError::Notification(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| CrosspostError::Notification(e.to_string()))?;

        info!(subject = %email.subject, "Outcome email sent");
        Ok(())
    }
}

/// Used when email is disabled: the email is only logged
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutcomeEmail) -> Result<()> {
        info!(subject = %email.subject, "Email disabled, outcome email not sent");
        Ok(())
    }
}

/// Keeps every email in memory; for tests
#[derive(Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<OutcomeEmail>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutcomeEmail> {
        self.outbox().clone()
    }

    fn outbox(&self) -> MutexGuard<'_, Vec<OutcomeEmail>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &OutcomeEmail) -> Result<()> {
        self.outbox().push(email.clone());
        Ok(())
    }
}

pub fn create_mailer(config: &EmailConfig) -> Result<Arc<dyn Mailer>> {
    if !config.enabled {
        tracing::debug!("Email notifications disabled");
        return Ok(Arc::new(LogMailer));
    }
    Ok(Arc::new(SmtpMailer::from_config(config)?))
}
