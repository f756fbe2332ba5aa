//! Outgoing mail transport.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::{SmtpConfig, SmtpSecurity};

/// A plain-text email ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub text_body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailerError>;
}

#[async_trait]
impl<T: Mailer + ?Sized> Mailer for Arc<T> {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailerError> {
        (**self).send(email).await
    }
}

/// SMTP mailer on lettre's async tokio transport.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build the transport. No connection is opened until the first send.
    pub fn new(config: &SmtpConfig, from: &str) -> Result<Self, MailerError> {
        let builder = match config.security {
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| MailerError::Transport(e.to_string()))?
            }
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailerError::Transport(e.to_string()))?,
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            }
        };

        let builder = builder.port(config.port);
        let builder = match &config.credentials {
            Some((username, password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            None => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from: parse_mailbox(from, None)?,
        })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailerError> {
        Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(&email.to, email.to_name.as_deref())?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.text_body.clone())
            .map_err(|e| MailerError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, email), fields(to = %email.to), err)]
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailerError> {
        let message = self.build_message(email)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;
        debug!(code = %response.code(), "smtp accepted message");
        Ok(())
    }
}

fn parse_mailbox(address: &str, name: Option<&str>) -> Result<Mailbox, MailerError> {
    let invalid = |reason: String| MailerError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    // A full "Name <addr>" string is accepted as-is.
    if address.contains('<') {
        return address.parse::<Mailbox>().map_err(|e| invalid(e.to_string()));
    }

    let email = address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| invalid(e.to_string()))?;
    Ok(Mailbox::new(name.map(str::to_string), email))
}

/// Recording mailer for tests. Sends to addresses registered with
/// [`InMemoryMailer::fail_for`] return a transport error.
#[derive(Debug, Default)]
pub struct InMemoryMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: Mutex<Vec<String>>,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, address: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(address.into());
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for InMemoryMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailerError> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&email.to))
            .unwrap_or(false);
        if failing {
            return Err(MailerError::Transport(format!(
                "mailbox unavailable: {}",
                email.to
            )));
        }

        self.sent
            .lock()
            .map_err(|_| MailerError::Transport("mailer lock poisoned".to_string()))?
            .push(email.clone());
        Ok(())
    }
}
