//! SMS alerts delivered through a carrier's email-to-SMS gateway.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::error::MonitorError;
use crate::secrets::SecretProvider;

#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

pub struct SmtpNotifier {
    from: Mailbox,
    recipients: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    /// Read the SMTP login from the secret store and prepare an implicit-TLS relay.
    pub async fn connect(config: &EmailConfig, secrets: &dyn SecretProvider) -> Result<Self> {
        let user = secrets.get_secret(&config.smtp_user_secret).await?;
        let password = secrets.get_secret(&config.smtp_password_secret).await?;

        let from: Mailbox = match &config.from_address {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("Invalid sender address: {addr}"))?,
            None => user.parse().with_context(|| {
                format!("SMTP user is not an email address, set email.from_address: {user}")
            })?,
        };
        let recipients = recipient_addresses(config)
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .with_context(|| format!("Invalid SMS gateway address: {addr}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
            .with_context(|| format!("Invalid SMTP server: {}", config.smtp_server))?
            .port(config.smtp_port)
            .credentials(Credentials::new(user, password))
            .build();

        Ok(Self {
            from,
            recipients,
            transport,
        })
    }
}

#[async_trait]
impl AlertNotifier for SmtpNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        deliver_to_all(&self.recipients, |recipient| async move {
            let message = build_message(&self.from, recipient, subject, body)?;
            self.transport
                .send(message)
                .await
                .map(|_| ())
                .context("SMTP delivery failed")
        })
        .await
    }
}

/// Attempt every recipient even after a failure, then report how many failed.
async fn deliver_to_all<'a, F, Fut>(recipients: &'a [Mailbox], mut deliver: F) -> Result<()>
where
    F: FnMut(&'a Mailbox) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failed = 0;

    for recipient in recipients {
        match deliver(recipient).await {
            Ok(()) => tracing::debug!(to = %recipient, "alert delivered"),
            Err(e) => {
                failed += 1;
                tracing::error!(to = %recipient, "failed to send alert: {e:#}");
            }
        }
    }

    if failed > 0 {
        return Err(MonitorError::Notification {
            failed,
            total: recipients.len(),
        }
        .into());
    }
    Ok(())
}

/// `{number}@{carrier_gateway}` for every configured phone number.
pub fn recipient_addresses(config: &EmailConfig) -> Vec<String> {
    config
        .phone_numbers
        .iter()
        .map(|number| format!("{}@{}", number.trim(), config.carrier_gateway))
        .collect()
}

fn build_message(from: &Mailbox, to: &Mailbox, subject: &str, body: &str) -> Result<Message> {
    Message::builder()
        .from(from.clone())
        .to(to.clone())
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .context("Failed to build alert email")
}
