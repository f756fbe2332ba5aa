//! Queue processor: drains eligible notification jobs with bounded retries.
//!
//! One run is a sequential loop:
//!
//! 1. (optional) return stale `PROCESSING` claims to `PENDING`
//! 2. fetch up to `batch_size` eligible jobs, oldest first
//! 3. for each: claim, deliver through the sender, write back the outcome, pause
//! 4. repeat until a fetch comes back empty
//!
//! A job that fails and still has budget is excluded from later fetches of the
//! same run, so each job is attempted at most once per run.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use paddock_core::JobId;
use paddock_notifications::NotificationPayload;

use crate::delivery::{DeliveryOutcome, NotificationRequest, NotificationSender};

use super::store::{JobStore, JobStoreError};
use super::types::{JobUpdate, NotificationJob, ProcessorConfig};

/// Pause strategy between delivery attempts.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Real sleep on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// No pause at all (tests, benchmarks).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl Delay for NoDelay {
    async fn wait(&self, _duration: Duration) {}
}

/// Run-level failure. Per-job delivery failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Delivery attempts made
    pub processed: u64,
    pub sent: u64,
    /// Recipient disabled the category; stored as `SENT`
    pub skipped: u64,
    /// Jobs that reached terminal `FAILED`
    pub failed: u64,
    /// Failed attempts returned to `PENDING` for a later run
    pub retried: u64,
    /// Jobs another processor claimed first
    pub lost_claims: u64,
    /// Stale `PROCESSING` jobs returned to `PENDING` at start
    pub reclaimed: u64,
    /// Non-empty fetches
    pub batches: u64,
    pub duration: Duration,
}

/// Sequential, run-to-completion notification queue processor.
pub struct QueueProcessor<S, N, D = TokioDelay> {
    store: S,
    sender: N,
    delay: D,
    config: ProcessorConfig,
}

impl<S, N> QueueProcessor<S, N, TokioDelay>
where
    S: JobStore,
    N: NotificationSender,
{
    /// Processor with the production constants and a real sleep between attempts.
    pub fn new(store: S, sender: N) -> Self {
        Self {
            store,
            sender,
            delay: TokioDelay,
            config: ProcessorConfig::default(),
        }
    }
}

impl<S, N, D> QueueProcessor<S, N, D>
where
    S: JobStore,
    N: NotificationSender,
    D: Delay,
{
    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_delay<D2: Delay>(self, delay: D2) -> QueueProcessor<S, N, D2> {
        QueueProcessor {
            store: self.store,
            sender: self.sender,
            delay,
            config: self.config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drain every currently eligible job once.
    pub async fn run(&self) -> Result<RunReport, ProcessorError> {
        let started = Instant::now();
        let mut report = RunReport::default();
        let max_retries = self.config.retry_policy.max_retries;

        info!(
            batch_size = self.config.batch_size,
            max_retries,
            delay_ms = self.config.delay_between_emails.as_millis() as u64,
            "notification queue run started"
        );

        let cutoff = self
            .config
            .stale_claim_after
            .and_then(|after| chrono::Duration::from_std(after).ok())
            .and_then(|after| Utc::now().checked_sub_signed(after));
        if let Some(cutoff) = cutoff {
            report.reclaimed = self.store.reclaim_stale(cutoff).await?;
            if report.reclaimed > 0 {
                warn!(
                    reclaimed = report.reclaimed,
                    "returned stale PROCESSING jobs to the queue"
                );
            }
        }

        // Jobs retried or lost to another run; not fetched again until the next run.
        let mut deferred: HashSet<JobId> = HashSet::new();

        loop {
            let exclude: Vec<JobId> = deferred.iter().cloned().collect();
            let batch = self
                .store
                .fetch_eligible_batch(self.config.batch_size, max_retries, &exclude)
                .await?;

            if batch.is_empty() {
                break;
            }

            report.batches += 1;
            info!(
                batch = report.batches,
                jobs = batch.len(),
                "processing notification batch"
            );

            for job in batch {
                let job_id = job.id.clone();
                match self.process_job(job, &mut report).await? {
                    Some(update) => {
                        if matches!(update, JobUpdate::Retry { .. }) {
                            deferred.insert(job_id);
                        }
                        self.delay.wait(self.config.delay_between_emails).await;
                    }
                    // Owned by someone else now; never refetch it in this run.
                    None => {
                        deferred.insert(job_id);
                    }
                }
            }

            info!(
                batch = report.batches,
                processed = report.processed,
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                "batch complete"
            );
        }

        report.duration = started.elapsed();
        info!(
            duration_ms = report.duration.as_millis() as u64,
            processed = report.processed,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            retried = report.retried,
            reclaimed = report.reclaimed,
            "notification queue drained"
        );

        Ok(report)
    }

    /// Claim, deliver and record one job.
    ///
    /// Returns the write-back that was applied, or `None` when the claim was lost.
    async fn process_job(
        &self,
        job: NotificationJob,
        report: &mut RunReport,
    ) -> Result<Option<JobUpdate>, ProcessorError> {
        let max_retries = self.config.retry_policy.max_retries;

        if !self.store.claim(&job.id, max_retries).await? {
            report.lost_claims += 1;
            debug!(job_id = %job.id, "job claimed by another run; skipping");
            return Ok(None);
        }

        report.processed += 1;
        let horse = job.display_name();

        let outcome = match NotificationPayload::from_data(job.kind, &job.data) {
            Ok(payload) => {
                let request = NotificationRequest {
                    job_id: job.id.clone(),
                    kind: job.kind,
                    horse_id: job.horse_id.clone(),
                    horse_name: horse.clone(),
                    payload,
                };
                self.sender.send(&request).await
            }
            Err(e) => DeliveryOutcome::Failed(format!("invalid {} payload: {e}", job.kind)),
        };

        let now = Utc::now();
        let update = match outcome {
            DeliveryOutcome::Delivered => {
                report.sent += 1;
                info!(job_id = %job.id, %horse, kind = %job.kind, "notification sent");
                JobUpdate::Sent { processed_at: now }
            }
            DeliveryOutcome::Skipped => {
                report.skipped += 1;
                info!(
                    job_id = %job.id,
                    %horse,
                    kind = %job.kind,
                    "notification skipped: recipient disabled this category"
                );
                JobUpdate::Sent { processed_at: now }
            }
            DeliveryOutcome::Failed(error) => {
                let update = self
                    .config
                    .retry_policy
                    .on_failure(job.retry_count, error.clone(), now);
                match &update {
                    JobUpdate::Failed { retry_count, .. } => {
                        report.failed += 1;
                        warn!(
                            job_id = %job.id,
                            %horse,
                            kind = %job.kind,
                            retry_count,
                            %error,
                            "notification failed permanently"
                        );
                    }
                    JobUpdate::Retry { retry_count, .. } => {
                        report.retried += 1;
                        warn!(
                            job_id = %job.id,
                            %horse,
                            kind = %job.kind,
                            retry_count,
                            %error,
                            "notification failed; will retry next run"
                        );
                    }
                    JobUpdate::Sent { .. } => {}
                }
                update
            }
        };

        self.store.update_status(&job.id, update.clone()).await?;
        Ok(Some(update))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::jobs::store::{InMemoryJobStore, JobStats};
    use crate::jobs::types::{JobStatus, MAX_RETRIES};
    use paddock_core::HorseId;
    use paddock_notifications::NotificationType;

    /// Sender returning a scripted outcome per horse (default: delivered).
    #[derive(Default)]
    struct ScriptedSender {
        outcomes: HashMap<String, DeliveryOutcome>,
        calls: Mutex<Vec<JobId>>,
    }

    impl ScriptedSender {
        fn with(mut self, horse: &str, outcome: DeliveryOutcome) -> Self {
            self.outcomes.insert(horse.to_string(), outcome);
            self
        }

        fn calls(&self) -> Vec<JobId> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSender for ScriptedSender {
        async fn send(&self, request: &NotificationRequest) -> DeliveryOutcome {
            self.calls.lock().unwrap().push(request.job_id.clone());
            self.outcomes
                .get(request.horse_id.as_str())
                .cloned()
                .unwrap_or(DeliveryOutcome::Delivered)
        }
    }

    #[derive(Default)]
    struct CountingDelay(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Delay for CountingDelay {
        async fn wait(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn race_job(horse: &str) -> NotificationJob {
        NotificationJob::new(
            NotificationType::NewRace,
            HorseId::from(horse),
            serde_json::json!({"raceDate": "2024-05-01", "position": 1}),
        )
        .with_horse_name(format!("{horse} name"))
    }

    fn processor(
        store: Arc<InMemoryJobStore>,
        sender: Arc<ScriptedSender>,
    ) -> QueueProcessor<Arc<InMemoryJobStore>, Arc<ScriptedSender>, NoDelay> {
        QueueProcessor::new(store, sender).with_delay(NoDelay)
    }

    #[tokio::test]
    async fn success_marks_sent() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(race_job("h1")).await.unwrap();

        let report = processor(store.clone(), Arc::new(ScriptedSender::default()))
            .run()
            .await
            .unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Sent);
        assert!(job.processed_at.is_some());
        assert_eq!(report.sent, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.batches, 1);
    }

    #[tokio::test]
    async fn last_failure_marks_failed() {
        let store = InMemoryJobStore::arc();
        let id = store
            .enqueue(race_job("h1").with_retry_count(2))
            .await
            .unwrap();
        let sender = ScriptedSender::default().with("h1", DeliveryOutcome::Failed("smtp down".into()));

        let report = processor(store.clone(), Arc::new(sender)).run().await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 3);
        assert_eq!(job.error.as_deref(), Some("smtp down"));
        assert!(job.processed_at.is_some());
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn failure_with_budget_left_is_retried_next_run_only() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(race_job("h1")).await.unwrap();
        let sender = Arc::new(
            ScriptedSender::default().with("h1", DeliveryOutcome::Failed("timeout".into())),
        );

        let report = processor(store.clone(), sender.clone()).run().await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.processed_at.is_none());
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.retried, 1);
        assert_eq!(sender.calls().len(), 1);
    }

    #[tokio::test]
    async fn skipped_is_sent_not_failed() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(race_job("h1")).await.unwrap();
        let sender = ScriptedSender::default().with("h1", DeliveryOutcome::Skipped);

        let report = processor(store.clone(), Arc::new(sender)).run().await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Sent);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn drains_across_batches() {
        let store = InMemoryJobStore::arc();
        let base = Utc::now() - chrono::Duration::hours(1);
        for i in 0..120 {
            store
                .enqueue(race_job("h1").created_at(base + chrono::Duration::seconds(i)))
                .await
                .unwrap();
        }
        let sender = Arc::new(ScriptedSender::default());

        let report = processor(store.clone(), sender.clone())
            .with_config(ProcessorConfig::default().with_batch_size(50))
            .run()
            .await
            .unwrap();

        assert_eq!(report.processed, 120);
        assert_eq!(report.sent, 120);
        assert_eq!(report.batches, 3);
        assert_eq!(store.stats().await.unwrap().sent, 120);

        // Attempted strictly oldest first
        let created: Vec<_> = {
            let all = store.all().unwrap();
            let by_id: HashMap<_, _> = all.into_iter().map(|j| (j.id.clone(), j.created_at)).collect();
            sender.calls().iter().map(|id| by_id[id]).collect()
        };
        assert!(created.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn invalid_payload_counts_as_failed_attempt() {
        let store = InMemoryJobStore::arc();
        let job = NotificationJob::new(
            NotificationType::HorseDeclared,
            HorseId::from("h1"),
            serde_json::json!({"jockeyName": "no race date"}),
        );
        let id = store.enqueue(job).await.unwrap();
        let sender = Arc::new(ScriptedSender::default());

        processor(store.clone(), sender.clone()).run().await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.error.unwrap().contains("raceDate"));
        assert!(sender.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_display_fields_do_not_block_delivery() {
        let store = InMemoryJobStore::arc();
        let job = NotificationJob::new(
            NotificationType::NewRace,
            HorseId::from("h1"),
            serde_json::json!({
                "raceDate": "2024-05-01",
                "distance": "a long way",
                "prizeMoney": "150.000 TL"
            }),
        )
        .with_retry_count(2);
        let id = store.enqueue(job).await.unwrap();
        let sender = Arc::new(ScriptedSender::default());

        let report = processor(store.clone(), sender.clone()).run().await.unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Sent);
        assert_eq!(job.retry_count, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(sender.calls(), vec![id]);
    }

    #[tokio::test]
    async fn stale_claims_are_reclaimed_and_processed() {
        let store = InMemoryJobStore::arc();
        let mut stalled = race_job("h1").with_status(JobStatus::Processing);
        stalled.claimed_at = Some(Utc::now() - chrono::Duration::hours(2));
        let id = store.enqueue(stalled).await.unwrap();

        let report = processor(store.clone(), Arc::new(ScriptedSender::default()))
            .run()
            .await
            .unwrap();

        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, JobStatus::Sent);
    }

    #[tokio::test]
    async fn reclaim_can_be_disabled() {
        let store = InMemoryJobStore::arc();
        let id = store
            .enqueue(race_job("h1").with_status(JobStatus::Processing))
            .await
            .unwrap();

        let report = processor(store.clone(), Arc::new(ScriptedSender::default()))
            .with_config(ProcessorConfig::default().with_stale_claim_after(None))
            .run()
            .await
            .unwrap();

        assert_eq!(report.reclaimed, 0);
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn fresh_claims_are_left_alone() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(race_job("h1")).await.unwrap();
        store.claim(&id, 3).await.unwrap();

        let report = processor(store.clone(), Arc::new(ScriptedSender::default()))
            .run()
            .await
            .unwrap();

        assert_eq!(report.reclaimed, 0);
        assert_eq!(report.processed, 0);
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn delay_follows_every_attempt() {
        let store = InMemoryJobStore::arc();
        store.enqueue(race_job("ok")).await.unwrap();
        store.enqueue(race_job("bad")).await.unwrap();
        let sender = ScriptedSender::default().with("bad", DeliveryOutcome::Failed("x".into()));
        let delay = Arc::new(CountingDelay::default());

        struct Shared(Arc<CountingDelay>);
        #[async_trait]
        impl Delay for Shared {
            async fn wait(&self, duration: Duration) {
                self.0.wait(duration).await
            }
        }

        QueueProcessor::new(store, Arc::new(sender))
            .with_delay(Shared(delay.clone()))
            .run()
            .await
            .unwrap();

        let waits = delay.0.lock().unwrap().clone();
        assert_eq!(waits, vec![Duration::from_millis(1000); 2]);
    }

    /// Store where another processor wins every claim.
    struct ContendedStore(Arc<InMemoryJobStore>);

    #[async_trait]
    impl JobStore for ContendedStore {
        async fn enqueue(&self, job: NotificationJob) -> Result<JobId, JobStoreError> {
            self.0.enqueue(job).await
        }

        async fn get(&self, job_id: &JobId) -> Result<Option<NotificationJob>, JobStoreError> {
            self.0.get(job_id).await
        }

        async fn fetch_eligible_batch(
            &self,
            limit: usize,
            max_retries: u32,
            exclude: &[JobId],
        ) -> Result<Vec<NotificationJob>, JobStoreError> {
            self.0.fetch_eligible_batch(limit, max_retries, exclude).await
        }

        async fn claim(&self, _job_id: &JobId, _max_retries: u32) -> Result<bool, JobStoreError> {
            Ok(false)
        }

        async fn update_status(&self, job_id: &JobId, update: JobUpdate) -> Result<(), JobStoreError> {
            self.0.update_status(job_id, update).await
        }

        async fn reclaim_stale(
            &self,
            claimed_before: chrono::DateTime<Utc>,
        ) -> Result<u64, JobStoreError> {
            self.0.reclaim_stale(claimed_before).await
        }

        async fn stats(&self) -> Result<JobStats, JobStoreError> {
            self.0.stats().await
        }
    }

    #[tokio::test]
    async fn lost_claims_are_skipped_without_counting() {
        let inner = InMemoryJobStore::arc();
        inner.enqueue(race_job("h1")).await.unwrap();
        inner.enqueue(race_job("h2")).await.unwrap();
        let sender = Arc::new(ScriptedSender::default());

        let report = QueueProcessor::new(ContendedStore(inner.clone()), sender.clone())
            .with_delay(NoDelay)
            .run()
            .await
            .unwrap();

        assert_eq!(report.lost_claims, 2);
        assert_eq!(report.processed, 0);
        assert_eq!(report.batches, 1);
        assert!(sender.calls().is_empty());
        assert_eq!(inner.stats().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn store_write_errors_abort_the_run() {
        let store = InMemoryJobStore::arc();
        store.enqueue(race_job("h1")).await.unwrap();

        struct AlwaysDelivers;

        #[async_trait]
        impl NotificationSender for AlwaysDelivers {
            async fn send(&self, _request: &NotificationRequest) -> DeliveryOutcome {
                DeliveryOutcome::Delivered
            }
        }

        struct RejectingStore(Arc<InMemoryJobStore>);

        #[async_trait]
        impl JobStore for RejectingStore {
            async fn enqueue(&self, job: NotificationJob) -> Result<JobId, JobStoreError> {
                self.0.enqueue(job).await
            }
            async fn get(&self, job_id: &JobId) -> Result<Option<NotificationJob>, JobStoreError> {
                self.0.get(job_id).await
            }
            async fn fetch_eligible_batch(
                &self,
                limit: usize,
                max_retries: u32,
                exclude: &[JobId],
            ) -> Result<Vec<NotificationJob>, JobStoreError> {
                self.0.fetch_eligible_batch(limit, max_retries, exclude).await
            }
            async fn claim(&self, job_id: &JobId, max_retries: u32) -> Result<bool, JobStoreError> {
                self.0.claim(job_id, max_retries).await
            }
            async fn update_status(&self, _job_id: &JobId, _update: JobUpdate) -> Result<(), JobStoreError> {
                Err(JobStoreError::Storage("connection reset".to_string()))
            }
            async fn reclaim_stale(
                &self,
                claimed_before: chrono::DateTime<Utc>,
            ) -> Result<u64, JobStoreError> {
                self.0.reclaim_stale(claimed_before).await
            }
            async fn stats(&self) -> Result<JobStats, JobStoreError> {
                self.0.stats().await
            }
        }

        let err = QueueProcessor::new(RejectingStore(store), AlwaysDelivers)
            .with_delay(NoDelay)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessorError::Store(JobStoreError::Storage(_))));
    }

    #[tokio::test]
    async fn second_run_over_empty_queue_reports_zero() {
        let store = InMemoryJobStore::arc();
        store.enqueue(race_job("h1")).await.unwrap();
        let sender = Arc::new(ScriptedSender::default());

        processor(store.clone(), sender.clone()).run().await.unwrap();
        let second = processor(store, sender).run().await.unwrap();

        assert_eq!(second.processed, 0);
        assert_eq!(second.sent, 0);
        assert_eq!(second.skipped, 0);
        assert_eq!(second.failed, 0);
        assert_eq!(second.batches, 0);
    }

    /// Hands control back to the runtime after every attempt.
    struct YieldDelay;

    #[async_trait]
    impl Delay for YieldDelay {
        async fn wait(&self, _duration: Duration) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn concurrent_runs_deliver_each_job_once() {
        let store = InMemoryJobStore::arc();
        let base = Utc::now() - chrono::Duration::hours(1);
        let mut ids = Vec::new();
        for i in 0..12 {
            let job = race_job(&format!("h{i}")).created_at(base + chrono::Duration::seconds(i));
            ids.push(store.enqueue(job).await.unwrap());
        }
        let sender = Arc::new(ScriptedSender::default());
        let config = ProcessorConfig::default().with_batch_size(50);
        let first = QueueProcessor::new(store.clone(), sender.clone())
            .with_delay(YieldDelay)
            .with_config(config.clone());
        let second = QueueProcessor::new(store.clone(), sender.clone())
            .with_delay(YieldDelay)
            .with_config(config);

        let (a, b) = tokio::join!(first.run(), second.run());
        let (a, b) = (a.unwrap(), b.unwrap());

        let mut calls = sender.calls();
        calls.sort();
        calls.dedup();
        assert_eq!(calls.len(), ids.len());
        assert_eq!(sender.calls().len(), ids.len());
        assert_eq!(a.processed + b.processed, ids.len() as u64);
        assert_eq!(a.sent + b.sent, ids.len() as u64);

        // Both runs fetched the same rows, so each one lost claims to the other.
        assert!(a.lost_claims > 0 || b.lost_claims > 0);
        assert!(a.lost_claims <= b.processed);
        assert!(b.lost_claims <= a.processed);

        for id in &ids {
            let job = store.get(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Sent);
            assert_eq!(job.retry_count, 0);
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        struct Seed {
            status: JobStatus,
            retry_count: u32,
            fails: bool,
        }

        fn seed() -> impl Strategy<Value = Seed> {
            (
                prop_oneof![
                    Just(JobStatus::Pending),
                    Just(JobStatus::Processing),
                    Just(JobStatus::Sent),
                    Just(JobStatus::Failed),
                ],
                0u32..6,
                any::<bool>(),
            )
                .prop_map(|(status, retry_count, fails)| Seed {
                    status,
                    retry_count,
                    fails,
                })
        }

        /// Seed the store, run once, return (before, after, report).
        fn run_once(
            seeds: &[Seed],
            batch_size: usize,
        ) -> (Vec<NotificationJob>, Vec<NotificationJob>, RunReport) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let store = InMemoryJobStore::arc();
                let mut sender = ScriptedSender::default();
                let base = Utc::now() - chrono::Duration::minutes(10);

                for (i, seed) in seeds.iter().enumerate() {
                    let horse = format!("h{i}");
                    if seed.fails {
                        sender = sender.with(&horse, DeliveryOutcome::Failed("boom".into()));
                    }
                    let mut job = race_job(&horse)
                        .with_retry_count(seed.retry_count)
                        .with_status(seed.status)
                        .created_at(base + chrono::Duration::seconds(i as i64));
                    if seed.status == JobStatus::Processing {
                        job.claimed_at = Some(Utc::now());
                    }
                    store.enqueue(job).await.unwrap();
                }

                let before = store.all().unwrap();
                let report = processor(store.clone(), Arc::new(sender))
                    .with_config(ProcessorConfig::default().with_batch_size(batch_size))
                    .run()
                    .await
                    .unwrap();
                let after = store.all().unwrap();
                (before, after, report)
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 200,
                ..ProptestConfig::default()
            })]

            /// Property: retry counts never decrease and never pass the budget through processing.
            #[test]
            fn retry_count_is_monotonic_and_bounded(
                seeds in prop::collection::vec(seed(), 0..40),
                batch_size in 1usize..8,
            ) {
                let (before, after, _) = run_once(&seeds, batch_size);
                let after: HashMap<_, _> = after.into_iter().map(|j| (j.id.clone(), j)).collect();

                for old in &before {
                    let new = &after[&old.id];
                    prop_assert!(new.retry_count >= old.retry_count);
                    if new.retry_count != old.retry_count {
                        prop_assert_eq!(new.retry_count, old.retry_count + 1);
                        prop_assert!(new.retry_count <= MAX_RETRIES);
                    }
                }
            }

            /// Property: terminal jobs are never touched.
            #[test]
            fn terminal_jobs_are_stable(seeds in prop::collection::vec(seed(), 0..40)) {
                let (before, after, _) = run_once(&seeds, 5);
                let after: HashMap<_, _> = after.into_iter().map(|j| (j.id.clone(), j)).collect();

                for old in before.iter().filter(|j| j.status.is_terminal()) {
                    prop_assert_eq!(&after[&old.id], old);
                }
            }

            /// Property: exactly the eligible jobs are attempted, each once, and counters add up.
            #[test]
            fn each_eligible_job_is_attempted_once(
                seeds in prop::collection::vec(seed(), 0..40),
                batch_size in 1usize..8,
            ) {
                let (before, after, report) = run_once(&seeds, batch_size);
                let eligible = before.iter().filter(|j| j.is_eligible(MAX_RETRIES)).count() as u64;

                prop_assert_eq!(report.processed, eligible);
                prop_assert_eq!(
                    report.processed,
                    report.sent + report.skipped + report.failed + report.retried
                );
                // Nothing eligible is left behind except jobs deferred for the next run.
                let still_eligible = after.iter().filter(|j| j.is_eligible(MAX_RETRIES)).count() as u64;
                prop_assert_eq!(still_eligible, report.retried);
            }
        }
    }
}
