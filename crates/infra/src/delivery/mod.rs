//! Notification delivery: who receives a job, how it is rendered, and the mail transport.
//!
//! The processor only sees [`NotificationSender`]; the email implementation
//! composes a [`RecipientDirectory`] and a [`Mailer`].

pub mod directory;
pub mod email;
pub mod mailer;
pub mod sender;

pub use directory::{
    DirectoryError, InMemoryRecipientDirectory, NotificationPreferences,
    PostgresRecipientDirectory, Recipient, RecipientDirectory, RecipientRole,
};
pub use email::EmailNotificationSender;
pub use mailer::{InMemoryMailer, Mailer, MailerError, OutgoingEmail, SmtpMailer};
pub use sender::{DeliveryOutcome, NotificationRequest, NotificationSender};
