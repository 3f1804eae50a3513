//! Best-effort teardown of segmentations and projects.
//!
//! Deleting a segmentation removes its pending jobs, stops its containers,
//! deletes its row and finally its output directory. Cancellation is
//! cooperative: a job may be claimed between the queue scan and the
//! container search, which is what the delayed second search covers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use brainns_core::naming::ContainerPrefix;
use brainns_core::storage::StorageLayout;
use brainns_core::types::{DbId, JobId};
use brainns_db::models::project::DeletedProject;
use brainns_db::models::segmentation::Segmentation;
use brainns_db::models::status::JobStatus;
use brainns_docker::ContainerRuntime;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::queue::{JobQueue, QueuedJob, Removal};
use crate::status::StatusNotifier;
use crate::store::SegmentationStore;

/// A cleanup step that failed without failing the delete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CleanupError {
    #[error("Failed to search containers of segmentation {segmentation_id}: {reason}")]
    ContainerSearch { segmentation_id: DbId, reason: String },

    #[error("Failed to stop container {container}: {reason}")]
    ContainerStop { container: String, reason: String },

    #[error("Failed to remove directory {}: {reason}", path.display())]
    Directory { path: PathBuf, reason: String },
}

/// What a delete actually did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionReport {
    pub removed_jobs: Vec<JobId>,
    pub stopped_containers: Vec<String>,
    pub warnings: Vec<CleanupError>,
    /// Filled by project deletes.
    pub project: Option<DeletedProject>,
}

#[derive(Clone)]
pub struct Reaper {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn SegmentationStore>,
    runtime: Arc<dyn ContainerRuntime>,
    notifier: StatusNotifier,
    layout: StorageLayout,
    race_window: Duration,
}

impl Reaper {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn SegmentationStore>,
        runtime: Arc<dyn ContainerRuntime>,
        notifier: StatusNotifier,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            queue,
            store,
            runtime,
            notifier,
            layout: config.storage.clone(),
            race_window: config.reaper_race_window,
        }
    }

    /// Delete one segmentation. A second delete of the same id is
    /// `NotFound` after repeating the (then empty) job and container sweep.
    pub async fn delete_segmentation(
        &self,
        segmentation_id: DbId,
    ) -> Result<DeletionReport, PipelineError> {
        let mut report = DeletionReport::default();
        let row = self.store.find_segmentation(segmentation_id).await?;
        if self
            .halt(segmentation_id, row.as_ref(), true, &mut report)
            .await?
        {
            self.search_again(&[segmentation_id], true, &mut report)
                .await;
        }

        let deleted = self
            .store
            .delete_segmentation(segmentation_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("segmentation", segmentation_id))?;

        let dir = self
            .layout
            .segmentation_dir(deleted.project_id, segmentation_id);
        remove_dir(&dir, &mut report).await;

        tracing::info!(
            segmentation_id,
            removed_jobs = report.removed_jobs.len(),
            stopped_containers = report.stopped_containers.len(),
            warnings = report.warnings.len(),
            display_values_removed = deleted.display_values_removed,
            "Segmentation deleted"
        );
        Ok(report)
    }

    /// Delete a project with everything in it. Running containers are
    /// killed without a grace period.
    pub async fn delete_project(&self, project_id: DbId) -> Result<DeletionReport, PipelineError> {
        if self.store.find_project(project_id).await?.is_none() {
            return Err(PipelineError::not_found("project", project_id));
        }

        let mut report = DeletionReport::default();
        let mut unresolved = Vec::new();
        for segmentation in self.store.list_segmentations(project_id).await? {
            if self
                .halt(segmentation.id, Some(&segmentation), false, &mut report)
                .await?
            {
                unresolved.push(segmentation.id);
            }
        }
        // One race window for the whole project.
        self.search_again(&unresolved, false, &mut report).await;

        let deleted = self
            .store
            .delete_project(project_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("project", project_id))?;
        remove_dir(&self.layout.project_dir(project_id), &mut report).await;

        tracing::info!(
            project_id,
            segmentations = deleted.segmentations,
            sequences = deleted.sequences,
            display_values = deleted.display_values,
            removed_jobs = report.removed_jobs.len(),
            stopped_containers = report.stopped_containers.len(),
            warnings = report.warnings.len(),
            "Project deleted"
        );
        report.project = Some(deleted);
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Remove pending jobs, then stop containers when work may be running.
    /// Returns whether a job may have been claimed without its container
    /// existing yet, in which case the search is repeated after the race
    /// window.
    async fn halt(
        &self,
        segmentation_id: DbId,
        row: Option<&Segmentation>,
        graceful: bool,
        report: &mut DeletionReport,
    ) -> Result<bool, PipelineError> {
        let removed = self.remove_pending_jobs(segmentation_id, report).await?;
        let running = match row {
            Some(row) => self.has_started_job(segmentation_id, row).await?,
            None => false,
        };
        if removed && !running {
            return Ok(false);
        }

        if self
            .stop_containers(segmentation_id, graceful, report)
            .await
        {
            return Ok(false);
        }
        // Nothing is left to be claimed for a finished or missing row.
        let settled = row.map_or(true, |row| {
            row.status().is_ok_and(|status| status.is_terminal())
        });
        Ok(running || !settled)
    }

    /// Wait out the race window once, then search for containers of every
    /// segmentation in `segmentation_ids` again.
    async fn search_again(
        &self,
        segmentation_ids: &[DbId],
        graceful: bool,
        report: &mut DeletionReport,
    ) {
        if segmentation_ids.is_empty() {
            return;
        }
        if !self.race_window.is_zero() {
            tracing::debug!(
                segmentations = ?segmentation_ids,
                window_ms = self.race_window.as_millis() as u64,
                "No containers found, searching again after race window"
            );
            tokio::time::sleep(self.race_window).await;
        }
        for &segmentation_id in segmentation_ids {
            self.stop_containers(segmentation_id, graceful, report)
                .await;
        }
    }

    /// Remove every pending job tagged with `segmentation_id`, newest first
    /// so its own dependents go before their dependencies. Dependents of
    /// other segmentations failed by the removal get their callbacks.
    async fn remove_pending_jobs(
        &self,
        segmentation_id: DbId,
        report: &mut DeletionReport,
    ) -> Result<bool, PipelineError> {
        let pending = self.queue.list_pending().await?;
        let mut removed_any = false;

        for job in pending
            .iter()
            .rev()
            .filter(|job| job.segmentation_id == segmentation_id)
        {
            match self.queue.remove(job.id).await? {
                Removal::Removed { failed_dependents } => {
                    tracing::debug!(segmentation_id, job_id = job.id, "Removed pending job");
                    removed_any = true;
                    report.removed_jobs.push(job.id);
                    self.notify_failed(segmentation_id, &failed_dependents);
                }
                // Claimed or already cascaded since the scan.
                Removal::NotRemovable => {}
            }
        }
        Ok(removed_any)
    }

    fn notify_failed(&self, segmentation_id: DbId, dependents: &[QueuedJob]) {
        for dependent in dependents
            .iter()
            .filter(|job| job.segmentation_id != segmentation_id)
        {
            if let Some(action) = dependent.on_failure {
                tracing::info!(
                    segmentation_id = dependent.segmentation_id,
                    job_id = dependent.id,
                    removed_for = segmentation_id,
                    "Dependent job failed by removal"
                );
                self.notifier
                    .callback(dependent.segmentation_id, dependent.id, action);
            }
        }
    }

    async fn has_started_job(
        &self,
        segmentation_id: DbId,
        row: &Segmentation,
    ) -> Result<bool, PipelineError> {
        for job_id in row.job_ids() {
            if let Some(job) = self.queue.fetch(job_id).await? {
                if job.segmentation_id == segmentation_id && job.status == JobStatus::Started {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Stop matching containers. Returns whether any were found.
    async fn stop_containers(
        &self,
        segmentation_id: DbId,
        graceful: bool,
        report: &mut DeletionReport,
    ) -> bool {
        let handles = match self
            .runtime
            .find_by_name_suffix(&ContainerPrefix::ALL, segmentation_id)
            .await
        {
            Ok(handles) => handles,
            Err(e) => {
                tracing::warn!(segmentation_id, error = %e, "Container search failed");
                report.warnings.push(CleanupError::ContainerSearch {
                    segmentation_id,
                    reason: e.to_string(),
                });
                return false;
            }
        };

        for handle in &handles {
            match self.runtime.stop(handle, graceful).await {
                Ok(()) => {
                    tracing::info!(segmentation_id, container = %handle.name, graceful, "Stopped container");
                    report.stopped_containers.push(handle.name.clone());
                }
                Err(e) => {
                    tracing::warn!(segmentation_id, container = %handle.name, error = %e, "Failed to stop container");
                    report.warnings.push(CleanupError::ContainerStop {
                        container: handle.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        !handles.is_empty()
    }
}

async fn remove_dir(dir: &Path, report: &mut DeletionReport) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove directory");
        report.warnings.push(CleanupError::Directory {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        });
    }
}
