//! Notification job queue: persisted job model, storage, and the batch processor.
//!
//! ## Design
//!
//! - Jobs are written `PENDING` by the web application and only mutated here
//! - The processor drains eligible jobs in `createdAt` order, in bounded batches
//! - Each job is claimed atomically before delivery (`PENDING -> PROCESSING`)
//! - Failures consume a bounded retry budget; the last one is terminal `FAILED`
//! - A recipient that disabled the category is a terminal `SENT`, not a failure
//!
//! ## Components
//!
//! - `NotificationJob`: one queued notification row
//! - `JobStore`: storage seam (in-memory for tests/dev, Postgres in production)
//! - `QueueProcessor`: run-to-completion consume loop with retry accounting

pub mod postgres;
pub mod processor;
pub mod store;
pub mod types;

pub use postgres::PostgresJobStore;
pub use processor::{Delay, NoDelay, ProcessorError, QueueProcessor, RunReport, TokioDelay};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    BATCH_SIZE, DELAY_BETWEEN_EMAILS, JobStatus, JobUpdate, MAX_RETRIES, NotificationJob,
    ProcessorConfig, RetryPolicy, STALE_CLAIM_AFTER,
};
