//! Email delivery of horse notifications to the horse's owner and trainer.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, warn};

use paddock_notifications::{MessageContext, render};

use super::directory::{Recipient, RecipientDirectory};
use super::mailer::{Mailer, OutgoingEmail};
use super::sender::{DeliveryOutcome, NotificationRequest, NotificationSender};

/// [`NotificationSender`] that emails every recipient who has the job's
/// category enabled.
///
/// A user who is both owner and trainer receives one email. The attempt is
/// `Failed` if any recipient's send fails, so a retry may repeat emails that
/// already went out to the other recipients.
pub struct EmailNotificationSender<D, M> {
    directory: D,
    mailer: M,
    base_url: Option<String>,
}

impl<D, M> EmailNotificationSender<D, M>
where
    D: RecipientDirectory,
    M: Mailer,
{
    pub fn new(directory: D, mailer: M) -> Self {
        Self {
            directory,
            mailer,
            base_url: None,
        }
    }

    /// Link to the web application in message footers.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    fn email_for(&self, request: &NotificationRequest, recipient: &Recipient) -> OutgoingEmail {
        let ctx = MessageContext {
            horse_name: &request.horse_name,
            recipient_name: recipient.name.as_deref(),
            base_url: self.base_url.as_deref(),
        };
        let message = render(&ctx, &request.payload);

        OutgoingEmail {
            to: recipient.email.clone(),
            to_name: recipient.name.clone(),
            subject: message.subject,
            text_body: message.text_body,
        }
    }
}

#[async_trait]
impl<D, M> NotificationSender for EmailNotificationSender<D, M>
where
    D: RecipientDirectory,
    M: Mailer,
{
    async fn send(&self, request: &NotificationRequest) -> DeliveryOutcome {
        let recipients = match self.directory.recipients_for_horse(&request.horse_id).await {
            Ok(recipients) => recipients,
            Err(e) => return DeliveryOutcome::Failed(e.to_string()),
        };

        if recipients.is_empty() {
            return DeliveryOutcome::Failed(format!(
                "no recipients for horse {}",
                request.horse_id
            ));
        }

        let category = request.kind.category();
        let mut seen = HashSet::new();
        let enabled: Vec<&Recipient> = recipients
            .iter()
            .filter(|r| r.preferences.allows(category))
            .filter(|r| seen.insert(r.email.to_ascii_lowercase()))
            .collect();

        if enabled.is_empty() {
            debug!(
                job_id = %request.job_id,
                %category,
                "all recipients disabled this category"
            );
            return DeliveryOutcome::Skipped;
        }

        let mut failures = Vec::new();
        for recipient in enabled {
            let email = self.email_for(request, recipient);
            if let Err(e) = self.mailer.send(&email).await {
                warn!(
                    job_id = %request.job_id,
                    role = %recipient.role,
                    error = %e,
                    "email delivery failed"
                );
                failures.push(format!("{}: {e}", recipient.role));
            }
        }

        if failures.is_empty() {
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::Failed(failures.join("; "))
        }
    }
}
