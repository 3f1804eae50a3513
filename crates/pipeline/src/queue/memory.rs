//! In-process [`JobQueue`].
//!
//! Same semantics as the Postgres backend, held in a mutex-guarded map.
//! Nothing survives a restart.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use brainns_core::types::JobId;
use brainns_db::models::status::JobStatus;
use brainns_db::repositories::job_repo::DEPENDENCY_FAILED;

use super::{EnqueueRequest, Failure, JobHandle, JobQueue, QueueError, QueuedJob, Removal};

#[derive(Default)]
struct QueueState {
    next_id: JobId,
    jobs: BTreeMap<JobId, QueuedJob>,
    /// Remaining enqueues before the queue reports itself unavailable.
    enqueue_budget: Option<usize>,
    /// Outcome reports (complete or fail) still to reject.
    report_outages: usize,
}

impl QueueState {
    fn take_report_outage(&mut self) -> Result<(), QueueError> {
        if self.report_outages == 0 {
            return Ok(());
        }
        self.report_outages -= 1;
        Err(QueueError::Unavailable("outcome report rejected".into()))
    }

    /// Mark deferred dependents of `id` failed, transitively, sorted by id.
    fn fail_dependents(&mut self, id: JobId) -> Vec<QueuedJob> {
        let mut frontier = vec![id];
        let mut failed = Vec::new();
        while let Some(parent) = frontier.pop() {
            for job in self.jobs.values_mut() {
                if job.depends_on == Some(parent) && job.status == JobStatus::Deferred {
                    job.status = JobStatus::Failed;
                    job.error_message = Some(DEPENDENCY_FAILED.to_string());
                    frontier.push(job.id);
                    failed.push(job.clone());
                }
            }
        }
        failed.sort_by_key(|job| job.id);
        failed
    }
}

#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `count` more enqueues, then fail every further one with
    /// [`QueueError::Unavailable`].
    pub fn limit_enqueues(&self, count: usize) {
        self.lock().enqueue_budget = Some(count);
    }

    /// Every job ever enqueued and not removed, by id.
    pub fn jobs(&self) -> Vec<QueuedJob> {
        self.lock().jobs.values().cloned().collect()
    }

    /// Reject the next `count` calls to `complete` or `fail` with
    /// [`QueueError::Unavailable`], leaving the jobs untouched.
    pub fn reject_reports(&self, count: usize) {
        self.lock().report_outages = count;
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobHandle, QueueError> {
        let mut state = self.lock();

        if let Some(budget) = state.enqueue_budget.as_mut() {
            if *budget == 0 {
                return Err(QueueError::Unavailable("enqueue limit reached".into()));
            }
            *budget -= 1;
        }

        let status = match request.depends_on {
            None => JobStatus::Queued,
            Some(dependency) => match state.jobs.get(&dependency).map(|job| job.status) {
                Some(JobStatus::Finished) => JobStatus::Queued,
                Some(JobStatus::Deferred | JobStatus::Queued | JobStatus::Started) => {
                    JobStatus::Deferred
                }
                Some(JobStatus::Failed) | None => {
                    return Err(QueueError::DependencyUnavailable(dependency));
                }
            },
        };

        state.next_id += 1;
        let job = QueuedJob {
            id: state.next_id,
            kind: request.kind,
            payload: request.payload,
            segmentation_id: request.segmentation_id,
            depends_on: request.depends_on,
            timeout: request.timeout,
            on_success: request.on_success,
            on_failure: request.on_failure,
            status,
            worker_id: None,
            error_message: None,
            enqueued_at: chrono::Utc::now(),
        };
        let handle = job.handle();
        state.jobs.insert(job.id, job);
        Ok(handle)
    }

    async fn fetch(&self, id: JobId) -> Result<Option<QueuedJob>, QueueError> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn remove(&self, id: JobId) -> Result<Removal, QueueError> {
        let mut state = self.lock();
        let pending = state
            .jobs
            .get(&id)
            .is_some_and(|job| job.status.is_pending());
        if !pending {
            return Ok(Removal::NotRemovable);
        }
        state.jobs.remove(&id);
        let failed_dependents = state.fail_dependents(id);
        Ok(Removal::Removed { failed_dependents })
    }

    async fn list_pending(&self) -> Result<Vec<QueuedJob>, QueueError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .filter(|job| job.status.is_pending())
            .cloned()
            .collect())
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueuedJob>, QueueError> {
        let mut state = self.lock();
        let next = state
            .jobs
            .values_mut()
            .find(|job| job.status == JobStatus::Queued);
        Ok(next.map(|job| {
            job.status = JobStatus::Started;
            job.worker_id = Some(worker_id.to_string());
            job.clone()
        }))
    }

    async fn complete(&self, id: JobId) -> Result<Option<QueuedJob>, QueueError> {
        let mut state = self.lock();
        state.take_report_outage()?;
        let Some(job) = state
            .jobs
            .get_mut(&id)
            .filter(|job| job.status == JobStatus::Started)
        else {
            return Ok(None);
        };
        job.status = JobStatus::Finished;
        let finished = job.clone();

        for dependent in state.jobs.values_mut() {
            if dependent.depends_on == Some(id) && dependent.status == JobStatus::Deferred {
                dependent.status = JobStatus::Queued;
            }
        }
        Ok(Some(finished))
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<Option<Failure>, QueueError> {
        let mut state = self.lock();
        state.take_report_outage()?;
        let Some(job) = state
            .jobs
            .get_mut(&id)
            .filter(|job| job.status == JobStatus::Started)
        else {
            return Ok(None);
        };
        job.status = JobStatus::Failed;
        job.error_message = Some(error.to_string());
        let job = job.clone();

        let failed_dependents = state.fail_dependents(id);
        Ok(Some(Failure {
            job,
            failed_dependents,
        }))
    }
}
