use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use paddock_core::{HorseId, JobId};
use paddock_notifications::{NotificationPayload, NotificationType};

/// Everything a sender needs to deliver one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub job_id: JobId,
    pub kind: NotificationType,
    pub horse_id: HorseId,
    /// Horse name, or the horse id when the horse row is gone
    pub horse_name: String,
    pub payload: NotificationPayload,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// At least one recipient received the message
    Delivered,
    /// Every recipient disabled this category; nothing was sent
    Skipped,
    /// Attempt failed; the string becomes the job's `error`
    Failed(String),
}

/// Delivers a notification.
///
/// Never returns `Err`: every problem is folded into [`DeliveryOutcome::Failed`]
/// so one bad job cannot abort a run.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, request: &NotificationRequest) -> DeliveryOutcome;
}

#[async_trait]
impl<T: NotificationSender + ?Sized> NotificationSender for Arc<T> {
    async fn send(&self, request: &NotificationRequest) -> DeliveryOutcome {
        (**self).send(request).await
    }
}
