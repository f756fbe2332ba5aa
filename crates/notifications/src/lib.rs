//! Horse lifecycle notification domain.
//!
//! Pure logic only (no IO, no storage, no transport): the closed set of
//! notification types, the typed payload each type carries, the preference
//! category a type belongs to, and how a notification is rendered into an
//! email message.

pub mod kind;
pub mod message;
pub mod payload;

pub use kind::{NotificationCategory, NotificationType};
pub use message::{MessageContext, RenderedMessage, render};
pub use payload::{
    Declaration, NotificationPayload, PayloadError, RaceResult, Registration, Training,
};
