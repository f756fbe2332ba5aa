//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paddock_core::{DomainError, HorseId, JobId};
use paddock_notifications::NotificationType;

/// Maximum jobs fetched per store query.
pub const BATCH_SIZE: usize = 50;

/// Failed attempts allowed before a job becomes terminal `FAILED`.
pub const MAX_RETRIES: u32 = 3;

/// Pause after every delivery attempt, to stay under the email provider's rate limits.
pub const DELAY_BETWEEN_EMAILS: Duration = Duration::from_millis(1000);

/// Age after which a `PROCESSING` claim is considered abandoned by a crashed run.
pub const STALE_CLAIM_AFTER: Duration = Duration::from_secs(60 * 60);

/// Job lifecycle status.
///
/// `PENDING -> PROCESSING -> SENT | PENDING (retry) | FAILED`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Queued, waiting for a processor run
    Pending,
    /// Claimed by a run, delivery in progress
    Processing,
    /// Delivered, or skipped because the recipient disabled the category
    Sent,
    /// Retry budget exhausted
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Sent => "SENT",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "SENT" => Ok(JobStatus::Sent),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// A queued notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    /// Assigned by the producer at enqueue time
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub horse_id: HorseId,
    /// Denormalized from the horse row when the batch is fetched
    pub horse_name: Option<String>,
    /// Event attributes captured at enqueue time
    pub data: serde_json::Value,
    pub status: JobStatus,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Last failure message (diagnostic only)
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set once, when the job reaches `SENT` or final `FAILED`
    pub processed_at: Option<DateTime<Utc>>,
    /// When the current `PROCESSING` claim was taken
    pub claimed_at: Option<DateTime<Utc>>,
}

impl NotificationJob {
    /// Create a new `PENDING` job.
    pub fn new(kind: NotificationType, horse_id: HorseId, data: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            kind,
            horse_id,
            horse_name: None,
            data,
            status: JobStatus::Pending,
            retry_count: 0,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
            claimed_at: None,
        }
    }

    pub fn with_horse_name(mut self, name: impl Into<String>) -> Self {
        self.horse_name = Some(name.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Whether a run may attempt delivery of this job.
    pub fn is_eligible(&self, max_retries: u32) -> bool {
        self.status == JobStatus::Pending && self.retry_count < max_retries
    }

    /// Name used in logs and messages; falls back to the horse id.
    pub fn display_name(&self) -> String {
        self.horse_name
            .clone()
            .unwrap_or_else(|| self.horse_id.to_string())
    }

    /// Mark job as claimed.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.claimed_at = Some(now);
    }

    /// Apply the outcome of an attempt.
    pub fn apply(&mut self, update: &JobUpdate) {
        match update {
            JobUpdate::Sent { processed_at } => {
                self.status = JobStatus::Sent;
                self.processed_at = Some(*processed_at);
            }
            JobUpdate::Retry { retry_count, error } => {
                self.status = JobStatus::Pending;
                self.retry_count = *retry_count;
                self.error = Some(error.clone());
            }
            JobUpdate::Failed {
                retry_count,
                error,
                processed_at,
            } => {
                self.status = JobStatus::Failed;
                self.retry_count = *retry_count;
                self.error = Some(error.clone());
                self.processed_at = Some(*processed_at);
            }
        }
    }
}

/// Status write-back after an attempt. Only valid for a `PROCESSING` job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    /// Delivered or skipped: terminal.
    Sent { processed_at: DateTime<Utc> },
    /// Failed with budget left: back to `PENDING` for a later run.
    Retry { retry_count: u32, error: String },
    /// Failed with the budget exhausted: terminal.
    Failed {
        retry_count: u32,
        error: String,
        processed_at: DateTime<Utc>,
    },
}

impl JobUpdate {
    pub fn resulting_status(&self) -> JobStatus {
        match self {
            JobUpdate::Sent { .. } => JobStatus::Sent,
            JobUpdate::Retry { .. } => JobStatus::Pending,
            JobUpdate::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Retry policy: a fixed budget of failed attempts, no in-run backoff.
///
/// Failed jobs wait for the next scheduled run, so the schedule itself is the backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts allowed; the attempt that reaches this count is terminal
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Check if a job with `retry_count` failures may be attempted again.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Decide the write-back for a failed attempt of a job that had `retry_count` failures.
    pub fn on_failure(&self, retry_count: u32, error: String, now: DateTime<Utc>) -> JobUpdate {
        let retry_count = retry_count.saturating_add(1);
        if self.should_retry(retry_count) {
            JobUpdate::Retry { retry_count, error }
        } else {
            JobUpdate::Failed {
                retry_count,
                error,
                processed_at: now,
            }
        }
    }
}

/// Processor knobs. Production uses `Default` (the module constants).
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size: usize,
    pub retry_policy: RetryPolicy,
    pub delay_between_emails: Duration,
    /// `None` disables stale-claim recovery at the start of a run
    pub stale_claim_after: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            retry_policy: RetryPolicy::default(),
            delay_between_emails: DELAY_BETWEEN_EMAILS,
            stale_claim_after: Some(STALE_CLAIM_AFTER),
        }
    }
}

impl ProcessorConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry_policy = RetryPolicy::new(max_retries);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_between_emails = delay;
        self
    }

    pub fn with_stale_claim_after(mut self, after: Option<Duration>) -> Self {
        self.stale_claim_after = after;
        self
    }
}
