//! Job storage implementations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use paddock_core::JobId;

use super::types::{JobStatus, JobUpdate, NotificationJob};

/// Error message recorded on jobs returned to the queue by stale-claim recovery.
pub const RECLAIMED_ERROR: &str = "reclaimed after stalled processing";

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a new job (producers; tests and tooling here).
    async fn enqueue(&self, job: NotificationJob) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    async fn get(&self, job_id: &JobId) -> Result<Option<NotificationJob>, JobStoreError>;

    /// Up to `limit` eligible jobs (`PENDING`, `retry_count < max_retries`),
    /// oldest `created_at` first, skipping ids in `exclude`.
    async fn fetch_eligible_batch(
        &self,
        limit: usize,
        max_retries: u32,
        exclude: &[JobId],
    ) -> Result<Vec<NotificationJob>, JobStoreError>;

    /// Atomically move an eligible job to `PROCESSING`.
    ///
    /// Returns `false` when the job is no longer eligible (another run claimed it).
    async fn claim(&self, job_id: &JobId, max_retries: u32) -> Result<bool, JobStoreError>;

    /// Write back the outcome of an attempt. The job must be `PROCESSING`.
    async fn update_status(&self, job_id: &JobId, update: JobUpdate) -> Result<(), JobStoreError>;

    /// Return `PROCESSING` jobs claimed before `claimed_before` to `PENDING`.
    ///
    /// `retry_count` is left untouched. Returns how many jobs were reclaimed.
    async fn reclaim_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, JobStoreError>;

    /// Get job statistics.
    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {job_id} is {status}, expected PROCESSING")]
    InvalidTransition { job_id: JobId, status: JobStatus },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus, count: usize) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Sent => self.sent += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.sent + self.failed
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, NotificationJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of every job, oldest first.
    pub fn all(&self) -> Result<Vec<NotificationJob>, JobStoreError> {
        let jobs = self.read()?;
        let mut all: Vec<_> = jobs.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, NotificationJob>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<JobId, NotificationJob>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NotificationJob) -> Result<JobId, JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id.clone();
        jobs.insert(id.clone(), job);
        Ok(id)
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<NotificationJob>, JobStoreError> {
        Ok(self.read()?.get(job_id).cloned())
    }

    async fn fetch_eligible_batch(
        &self,
        limit: usize,
        max_retries: u32,
        exclude: &[JobId],
    ) -> Result<Vec<NotificationJob>, JobStoreError> {
        let jobs = self.read()?;
        let exclude: HashSet<&JobId> = exclude.iter().collect();

        let mut candidates: Vec<_> = jobs
            .values()
            .filter(|j| j.is_eligible(max_retries) && !exclude.contains(&j.id))
            .cloned()
            .collect();

        // Sort by created_at to ensure FIFO
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn claim(&self, job_id: &JobId, max_retries: u32) -> Result<bool, JobStoreError> {
        let mut jobs = self.write()?;
        match jobs.get_mut(job_id) {
            Some(job) if job.is_eligible(max_retries) => {
                job.mark_processing(Utc::now());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(JobStoreError::NotFound(job_id.clone())),
        }
    }

    async fn update_status(&self, job_id: &JobId, update: JobUpdate) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobStoreError::NotFound(job_id.clone()))?;

        if job.status != JobStatus::Processing {
            return Err(JobStoreError::InvalidTransition {
                job_id: job_id.clone(),
                status: job.status,
            });
        }

        job.apply(&update);
        Ok(())
    }

    async fn reclaim_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, JobStoreError> {
        let mut jobs = self.write()?;
        let mut reclaimed = 0;

        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.claimed_at.is_none_or(|at| at < claimed_before);
            if stale {
                job.status = JobStatus::Pending;
                job.claimed_at = None;
                job.error = Some(RECLAIMED_ERROR.to_string());
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn enqueue(&self, job: NotificationJob) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job).await
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<NotificationJob>, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn fetch_eligible_batch(
        &self,
        limit: usize,
        max_retries: u32,
        exclude: &[JobId],
    ) -> Result<Vec<NotificationJob>, JobStoreError> {
        (**self).fetch_eligible_batch(limit, max_retries, exclude).await
    }

    async fn claim(&self, job_id: &JobId, max_retries: u32) -> Result<bool, JobStoreError> {
        (**self).claim(job_id, max_retries).await
    }

    async fn update_status(&self, job_id: &JobId, update: JobUpdate) -> Result<(), JobStoreError> {
        (**self).update_status(job_id, update).await
    }

    async fn reclaim_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, JobStoreError> {
        (**self).reclaim_stale(claimed_before).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }
}
