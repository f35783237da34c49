//! Outbound email collaborator (best-effort fallback channel).

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::config::EmailConfig;
use crate::error::CoreError;

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), CoreError>;
}

/// Production transport: SMTP relay via lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self, CoreError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| CoreError::Internal(format!("smtp relay setup failed: {e}")))?;
        if !config.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_password.clone(),
            ));
        }
        let from = config
            .from_address
            .parse()
            .map_err(|e| CoreError::Internal(format!("invalid from address: {e}")))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), CoreError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| CoreError::Delivery(format!("invalid recipient address: {e}")))?;
        let email = lettre::Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| CoreError::Delivery(format!("failed to build mail: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| CoreError::Delivery(format!("smtp send failed: {e}")))?;
        Ok(())
    }
}

/// Dev-mode sandbox: logs the attempt and reports success.
pub struct SandboxMailer;

#[async_trait]
impl EmailTransport for SandboxMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), CoreError> {
        tracing::info!(to = %to, subject = %subject, "Sandbox email delivery");
        Ok(())
    }
}
