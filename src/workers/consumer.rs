//! # Stage Worker
//!
//! Pulls envelopes from one stage queue and runs them through a
//! [`JobHandler`] with bounded parallelism.
//!
//! ```text
//! queue → receive (≤ free permits) → [Semaphore] → timeout(handle) → outcome
//!                                                                     │
//!              success ─────────────────────────────────────→ archive ┤
//!              retryable, attempts left → re-send w/ backoff → delete ┤
//!              otherwise ─────────────→ on_exhausted ───────→ archive ┘
//! ```
//!
//! A retry is sent before the original is deleted, so a crash in between
//! produces a duplicate rather than a lost job. A job whose worker dies
//! reappears once its visibility timeout (job timeout + grace) lapses.
//! Messages are reserved with the default policy's timeout; an envelope
//! carrying a longer timeout extends its own reservation before it runs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::context::JobContext;
use super::handler::JobHandler;
use crate::error::{PipelineError, PipelineResult};
use crate::messaging::QueuedMessage;
use crate::queues::{JobEnvelope, JobSubmitter};

/// What happened to one received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retried,
    /// Permanently failed and archived
    Failed,
    /// Undecodable message, archived without running
    Discarded,
}

pub struct StageWorker<H: JobHandler> {
    handler: Arc<H>,
    submitter: JobSubmitter,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    poll_interval: Duration,
}

impl<H: JobHandler> Clone for StageWorker<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            submitter: self.submitter.clone(),
            semaphore: self.semaphore.clone(),
            concurrency: self.concurrency,
            poll_interval: self.poll_interval,
        }
    }
}

impl<H: JobHandler> std::fmt::Debug for StageWorker<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageWorker")
            .field("stage", &self.handler.stage())
            .field("concurrency", &self.concurrency)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl<H: JobHandler> StageWorker<H> {
    pub fn new(
        handler: Arc<H>,
        submitter: JobSubmitter,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            handler,
            submitter,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            poll_interval,
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn visibility_timeout(&self) -> Duration {
        self.submitter.default_policy().visibility_timeout()
    }

    /// Receive one batch of visible messages and process all of them to
    /// completion. Returns the outcomes in completion order.
    pub async fn run_once(&self) -> PipelineResult<Vec<JobOutcome>> {
        let mut in_flight = JoinSet::new();
        self.receive_and_spawn(&mut in_flight).await?;

        let mut outcomes = Vec::with_capacity(in_flight.len());
        while let Some(joined) = in_flight.join_next().await {
            if let Some(outcome) = Self::joined_outcome(joined) {
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }

    /// Consume until `shutdown` turns true, then wait for in-flight jobs
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let stage = self.handler.stage();
        let queue = match self.submitter.registry().queue(stage).await {
            Ok(queue) => queue,
            Err(e) => {
                error!(stage = %stage, error = %e, "Stage queue unavailable, worker not started");
                return;
            }
        };
        info!(stage = %stage, concurrency = self.concurrency, "Stage worker started");

        let mut in_flight = JoinSet::new();
        loop {
            if *shutdown.borrow() {
                break;
            }

            // Reap finished jobs so the set does not grow unbounded.
            while let Some(joined) = in_flight.try_join_next() {
                Self::joined_outcome(joined);
            }

            if self.semaphore.available_permits() == 0 {
                tokio::select! {
                    joined = in_flight.join_next() => {
                        if let Some(joined) = joined {
                            Self::joined_outcome(joined);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            match self.receive_and_spawn(&mut in_flight).await {
                Ok(0) => {
                    tokio::select! {
                        _ = self
                            .submitter
                            .registry()
                            .provider()
                            .wait_for_messages(queue, self.poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(received) => {
                    debug!(stage = %stage, received, "Dispatched jobs");
                }
                Err(e) => {
                    warn!(stage = %stage, error = %e, "Receive failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!(
            stage = %stage,
            in_flight = in_flight.len(),
            "Stage worker draining in-flight jobs"
        );
        while let Some(joined) = in_flight.join_next().await {
            Self::joined_outcome(joined);
        }
        info!(stage = %stage, "Stage worker stopped");
    }

    async fn receive_and_spawn(
        &self,
        in_flight: &mut JoinSet<JobOutcome>,
    ) -> PipelineResult<usize> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            return Ok(0);
        }

        let queue = self.submitter.registry().queue(self.handler.stage()).await?;
        let messages = self
            .submitter
            .registry()
            .provider()
            .receive_messages::<Value>(queue, available, self.visibility_timeout())
            .await?;

        let received = messages.len();
        for message in messages {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::Internal("worker semaphore closed".to_string()))?;
            let worker = self.clone();
            in_flight.spawn(async move {
                let outcome = worker.process(queue, message).await;
                drop(permit);
                outcome
            });
        }
        Ok(received)
    }

    fn joined_outcome(joined: Result<JobOutcome, tokio::task::JoinError>) -> Option<JobOutcome> {
        match joined {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, "Job task aborted");
                None
            }
        }
    }

    async fn process(&self, queue: &'static str, message: QueuedMessage<Value>) -> JobOutcome {
        let stage = self.handler.stage();
        let provider = self.submitter.registry().provider().clone();
        let receipt = message.receipt_handle.clone();

        let envelope: JobEnvelope<H::Payload> = match serde_json::from_value(message.message) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    stage = %stage,
                    receipt_handle = %receipt,
                    error = %e,
                    "Undecodable job payload, archiving without processing"
                );
                if let Err(e) = provider.archive_message(queue, &receipt).await {
                    error!(stage = %stage, error = %e, "Failed to archive undecodable message");
                }
                return JobOutcome::Discarded;
            }
        };

        let reserved_for = envelope.policy.visibility_timeout();
        if reserved_for > self.visibility_timeout() {
            if let Err(e) = provider
                .extend_visibility(queue, &receipt, reserved_for)
                .await
            {
                warn!(
                    stage = %stage,
                    job_id = %envelope.job_id,
                    error = %e,
                    "Failed to extend visibility, job may be redelivered while running"
                );
            }
        }

        let ctx = JobContext::new(&envelope, queue, provider.clone());
        let started = Instant::now();
        crate::log_job!(
            debug,
            "job_started",
            stage: stage,
            job_id: envelope.job_id,
            attempt: ctx.attempt,
            max_attempts: ctx.max_attempts,
        );

        let timeout = envelope.policy.timeout;
        let execution = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(self.handler.handle(&ctx, envelope.data.clone())).catch_unwind(),
        )
        .await;

        let (result, retryable) = match execution {
            Ok(Ok(result)) => {
                let retryable = result.as_ref().err().is_some_and(PipelineError::is_retryable);
                (result, retryable)
            }
            Ok(Err(panic)) => {
                let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                // Panics are not retried.
                (
                    Err(PipelineError::Internal(format!("handler panicked: {panic_msg}"))),
                    false,
                )
            }
            Err(_) => (
                Err(PipelineError::JobTimeout {
                    stage: stage.to_string(),
                    timeout,
                }),
                true,
            ),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let error = match result {
            Ok(()) => {
                if let Err(e) = provider.archive_message(queue, &receipt).await {
                    error!(stage = %stage, job_id = %envelope.job_id, error = %e, "Failed to archive completed job");
                }
                crate::log_job!(
                    info,
                    "job_completed",
                    stage: stage,
                    job_id: envelope.job_id,
                    attempt: ctx.attempt,
                    elapsed_ms: elapsed_ms,
                );
                return JobOutcome::Completed;
            }
            Err(e) => e,
        };

        if retryable && envelope.policy.allows_retry(envelope.attempt()) {
            let delay = envelope.policy.retry_delay(envelope.attempt());
            let retry = envelope.retried(&error.to_string(), ctx.latest_progress());
            match self.submitter.send_envelope(&retry, delay).await {
                Ok(_) => {
                    if let Err(e) = provider.ack_message(queue, &receipt).await {
                        warn!(stage = %stage, job_id = %envelope.job_id, error = %e, "Failed to delete retried message");
                    }
                    crate::log_job!(
                        warn,
                        "job_retry_scheduled",
                        stage: stage,
                        job_id: envelope.job_id,
                        attempt: ctx.attempt,
                        delay_ms: delay.as_millis() as u64,
                        severity: error.severity(),
                        error: error.to_string(),
                    );
                    return JobOutcome::Retried;
                }
                Err(e) => {
                    // Leave the message reserved; it reappears after the visibility timeout.
                    error!(stage = %stage, job_id = %envelope.job_id, error = %e, "Failed to schedule retry");
                    return JobOutcome::Retried;
                }
            }
        }

        crate::log_job!(
            error,
            "job_failed",
            stage: stage,
            job_id: envelope.job_id,
            attempt: ctx.attempt,
            retryable: retryable,
            severity: error.severity(),
            error: error.to_string(),
        );
        if let Err(e) = self.handler.on_exhausted(&envelope.data, &error).await {
            error!(stage = %stage, job_id = %envelope.job_id, error = %e, "Failure hook failed");
        }
        if let Err(e) = provider.archive_message(queue, &receipt).await {
            error!(stage = %stage, job_id = %envelope.job_id, error = %e, "Failed to archive failed job");
        }
        JobOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessagingProvider;
    use crate::queues::{Backoff, PipelineStage, QueueRegistry, RetryPolicy};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    #[derive(Debug, Default)]
    struct FlakyHandler {
        failures_before_success: u32,
        calls: AtomicU32,
        exhausted: Mutex<Vec<String>>,
        retryable: bool,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        type Payload = String;

        fn stage(&self) -> PipelineStage {
            PipelineStage::Translation
        }

        async fn handle(&self, _ctx: &JobContext, _payload: String) -> PipelineResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures_before_success {
                if self.retryable {
                    return Err(PipelineError::Translation("backend unavailable".into()));
                }
                return Err(PipelineError::InvalidTranslationOptions("no target".into()));
            }
            Ok(())
        }

        async fn on_exhausted(&self, payload: &String, error: &PipelineError) -> PipelineResult<()> {
            self.exhausted.lock().push(format!("{payload}: {error}"));
            Ok(())
        }
    }

    /// Parks inside `handle` until released
    #[derive(Debug, Default)]
    struct GatedHandler {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl JobHandler for GatedHandler {
        type Payload = String;

        fn stage(&self) -> PipelineStage {
            PipelineStage::FileProcessing
        }

        async fn handle(&self, _ctx: &JobContext, _payload: String) -> PipelineResult<()> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
            retention: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
        }
    }

    fn worker(handler: FlakyHandler) -> (StageWorker<FlakyHandler>, JobSubmitter) {
        let provider = Arc::new(MessagingProvider::new_in_memory());
        let registry = Arc::new(QueueRegistry::new(provider));
        let submitter = JobSubmitter::new(registry, fast_policy());
        let worker = StageWorker::new(
            Arc::new(handler),
            submitter.clone(),
            2,
            Duration::from_millis(10),
        );
        (worker, submitter)
    }

    async fn drain(worker: &StageWorker<FlakyHandler>) -> Vec<JobOutcome> {
        let mut all = Vec::new();
        for _ in 0..10 {
            let outcomes = worker.run_once().await.unwrap();
            if outcomes.is_empty() {
                break;
            }
            all.extend(outcomes);
        }
        all
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (worker, submitter) = worker(FlakyHandler {
            failures_before_success: 2,
            retryable: true,
            ..FlakyHandler::default()
        });
        submitter
            .submit(PipelineStage::Translation, "group-1".to_string(), None)
            .await
            .unwrap();

        let outcomes = drain(&worker).await;
        assert_eq!(
            outcomes,
            vec![JobOutcome::Retried, JobOutcome::Retried, JobOutcome::Completed]
        );
        assert!(worker.handler().exhausted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_after_attempt_limit() {
        let (worker, submitter) = worker(FlakyHandler {
            failures_before_success: 10,
            retryable: true,
            ..FlakyHandler::default()
        });
        submitter
            .submit(PipelineStage::Translation, "group-1".to_string(), None)
            .await
            .unwrap();

        let outcomes = drain(&worker).await;
        assert_eq!(outcomes.last(), Some(&JobOutcome::Failed));
        assert_eq!(worker.handler().calls.load(Ordering::SeqCst), 3);
        assert_eq!(worker.handler().exhausted.lock().len(), 1);

        let memory = submitter.registry().provider().as_in_memory().unwrap();
        assert_eq!(memory.queue_length("translation").await, 0);
        let archived: Vec<JobEnvelope<String>> =
            memory.archived_messages("translation").await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].attempts_made, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_first_time() {
        let (worker, submitter) = worker(FlakyHandler {
            failures_before_success: 1,
            retryable: false,
            ..FlakyHandler::default()
        });
        submitter
            .submit(PipelineStage::Translation, "group-1".to_string(), None)
            .await
            .unwrap();

        assert_eq!(drain(&worker).await, vec![JobOutcome::Failed]);
        assert_eq!(worker.handler().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_long_timeout_job_extends_its_reservation() {
        let provider = Arc::new(MessagingProvider::new_in_memory());
        let registry = Arc::new(QueueRegistry::new(provider.clone()));
        let submitter = JobSubmitter::new(registry, fast_policy());
        let handler = Arc::new(GatedHandler::default());
        let worker = StageWorker::new(
            handler.clone(),
            submitter.clone(),
            1,
            Duration::from_millis(10),
        );

        let long_running = RetryPolicy {
            timeout: Duration::from_secs(3600),
            ..fast_policy()
        };
        submitter
            .submit(
                PipelineStage::FileProcessing,
                "big-deck".to_string(),
                Some(long_running),
            )
            .await
            .unwrap();

        let running = worker.clone();
        let task = tokio::spawn(async move { running.run_once().await });
        tokio::time::timeout(Duration::from_secs(5), handler.started.notified())
            .await
            .unwrap();

        let memory = provider.as_in_memory().unwrap();
        let reserved = memory.reserved_until("file-processing").await;
        assert_eq!(reserved.len(), 1);
        let default_expiry = chrono::Utc::now()
            + chrono::Duration::from_std(fast_policy().visibility_timeout()).unwrap();
        assert!(reserved[0] > default_expiry + chrono::Duration::minutes(30));

        handler.release.notify_one();
        let outcomes = task.await.unwrap().unwrap();
        assert_eq!(outcomes, vec![JobOutcome::Completed]);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_discarded() {
        let (worker, submitter) = worker(FlakyHandler::default());
        submitter
            .submit(PipelineStage::Translation, 42_u32, None)
            .await
            .unwrap();

        assert_eq!(drain(&worker).await, vec![JobOutcome::Discarded]);
        assert_eq!(worker.handler().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (worker, submitter) = worker(FlakyHandler::default());
        submitter
            .submit(PipelineStage::Translation, "group-1".to_string(), None)
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let running = worker.clone();
        let handle = tokio::spawn(async move { running.run(rx).await });

        for _ in 0..100 {
            if worker.handler().calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worker.handler().calls.load(Ordering::SeqCst), 1);
    }
}
