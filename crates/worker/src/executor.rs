//! Worker loop.
//!
//! Polls the queue every `poll_interval`, runs claimed jobs one at a time
//! and reports their outcome back to the queue, retrying transient queue
//! failures so a finished job is not left `started`. Terminal callbacks are
//! turned into [`StatusEvent`](brainns_pipeline::StatusEvent)s through the
//! job context's notifier.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use brainns_core::job_payload::{JobKind, PredictionJobInput, PreprocessingJobInput};
use brainns_core::naming::ContainerPrefix;
use brainns_core::types::JobId;
use brainns_pipeline::{JobQueue, QueueError, QueuedJob, RetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::context::JobContext;
use crate::error::JobError;
use crate::jobs::{run_prediction_job, run_preprocessing_job};

/// Default polling interval for the worker loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One job at a time, claimed under `id`.
pub struct WorkerLoop {
    id: String,
    queue: Arc<dyn JobQueue>,
    ctx: JobContext,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl WorkerLoop {
    pub fn new(id: impl Into<String>, queue: Arc<dyn JobQueue>, ctx: JobContext) -> Self {
        Self {
            id: id.into(),
            queue,
            ctx,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Retries for reporting a job's outcome to the queue.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until the cancellation token is triggered. A job in flight is
    /// finished before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            worker_id = %self.id,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Worker started",
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.run_once().await {
                // Drain the queue before sleeping again.
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => tracing::error!(worker_id = %self.id, error = %e, "Poll cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracing::info!(worker_id = %self.id, "Worker shutting down");
    }

    /// Claim and run at most one job. Returns whether a job was claimed.
    pub async fn run_once(&self) -> Result<bool, QueueError> {
        let Some(job) = self.queue.claim_next(&self.id).await? else {
            return Ok(false);
        };
        tracing::info!(
            worker_id = %self.id,
            job_id = job.id,
            kind = %job.kind,
            segmentation_id = job.segmentation_id,
            "Job claimed",
        );

        match self.execute(&job).await {
            Ok(()) => self.complete(&job).await?,
            Err(e) => self.fail(&job, &e).await?,
        }
        Ok(true)
    }

    async fn execute(&self, job: &QueuedJob) -> Result<(), JobError> {
        let run = self.dispatch(job);
        if job.timeout.is_zero() {
            return run.await;
        }
        match tokio::time::timeout(job.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                self.kill_containers(job).await;
                Err(JobError::Timeout(job.timeout))
            }
        }
    }

    async fn dispatch(&self, job: &QueuedJob) -> Result<(), JobError> {
        match job.kind {
            JobKind::Preprocess => {
                let input: PreprocessingJobInput = job.decode()?;
                run_preprocessing_job(&self.ctx, input).await
            }
            JobKind::Predict => {
                let input: PredictionJobInput = job.decode()?;
                run_prediction_job(&self.ctx, input).await
            }
        }
    }

    /// Stop whatever a timed-out job left running.
    async fn kill_containers(&self, job: &QueuedJob) {
        let handles = match self
            .ctx
            .runtime
            .find_by_name_suffix(&ContainerPrefix::ALL, job.segmentation_id)
            .await
        {
            Ok(handles) => handles,
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "Container search after timeout failed");
                return;
            }
        };
        for handle in handles {
            if let Err(e) = self.ctx.runtime.stop(&handle, false).await {
                tracing::warn!(job_id = job.id, container = %handle.name, error = %e, "Failed to kill container");
            }
        }
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let Some(done) = self
            .report(job.id, || self.queue.complete(job.id))
            .await?
        else {
            tracing::warn!(job_id = job.id, "Job no longer started, result discarded");
            return Ok(());
        };
        tracing::info!(job_id = done.id, segmentation_id = done.segmentation_id, "Job finished");
        if let Some(action) = done.on_success {
            self.ctx
                .notifier
                .callback(done.segmentation_id, done.id, action);
        }
        Ok(())
    }

    async fn fail(&self, job: &QueuedJob, error: &JobError) -> Result<(), QueueError> {
        tracing::error!(
            job_id = job.id,
            segmentation_id = job.segmentation_id,
            error = %error,
            "Job failed",
        );
        let message = error.to_string();
        let Some(failure) = self
            .report(job.id, || self.queue.fail(job.id, &message))
            .await?
        else {
            tracing::warn!(job_id = job.id, "Job no longer started, failure discarded");
            return Ok(());
        };

        for failed in std::iter::once(&failure.job).chain(&failure.failed_dependents) {
            if let Some(action) = failed.on_failure {
                self.ctx
                    .notifier
                    .callback(failed.segmentation_id, failed.id, action);
            }
        }
        if !failure.failed_dependents.is_empty() {
            tracing::info!(
                job_id = job.id,
                dependents = failure.failed_dependents.len(),
                "Dependent jobs failed with it",
            );
        }
        Ok(())
    }

    /// Run a queue update, retrying transient failures with backoff.
    async fn report<T, F, Fut>(&self, job_id: JobId, mut update: F) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut delay = self.retry.backoff;

        let mut attempt = 1;
        loop {
            match update().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        job_id,
                        attempt,
                        error = %e,
                        "Reporting job outcome failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(job_id, attempt, error = %e, "Job outcome not recorded");
                    return Err(e);
                }
            }
        }
    }
}
