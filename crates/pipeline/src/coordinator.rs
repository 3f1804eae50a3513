//! Turns a segmentation request into correctly wired queue jobs.
//!
//! A request results in a preprocessing job followed by a dependent
//! prediction job, unless preprocessing of the same sequence combination
//! can be reused (pending: depend on it, finished: skip it) or the model
//! reads raw uploads directly. Any failure after the row is created is
//! compensated before the error is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use brainns_core::job_payload::{FileFormat, PredictionJobInput, PreprocessingJobInput};
use brainns_core::model_registry::{ModelConfig, ModelRegistry};
use brainns_core::sequence::{SequenceIds, SequenceKind, SequenceSelection};
use brainns_core::status::SegmentationStatus;
use brainns_core::storage::StorageLayout;
use brainns_core::submission::SubmitSegmentation;
use brainns_core::types::{DbId, JobId};
use brainns_db::models::segmentation::{CreateSegmentation, Segmentation};
use brainns_db::models::status::JobStatus;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::queue::{EnqueueRequest, JobQueue};
use crate::store::SegmentationStore;

/// Prefix of the preprocessing key of models that read raw uploads.
pub const RAW_KEY_PREFIX: &str = "raw_";

/// Result of a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub segmentation_id: DbId,
    /// The preprocessing job this segmentation waits for, if any. May be
    /// owned by another segmentation when its work is reused.
    pub preprocessing_job_id: Option<JobId>,
    pub prediction_job_id: JobId,
    pub status: SegmentationStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct JobTimeouts {
    pub preprocessing: Duration,
    pub prediction: Duration,
}

/// Everything decided before jobs are wired.
struct Plan<'a> {
    model: &'a ModelConfig,
    file_format: FileFormat,
    selection: SequenceSelection,
    segmentation: Segmentation,
    reusable: Option<Segmentation>,
    preprocessed_dir: PathBuf,
    result_dir: PathBuf,
}

#[derive(Clone)]
pub struct Coordinator {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn SegmentationStore>,
    registry: Arc<ModelRegistry>,
    layout: StorageLayout,
    timeouts: JobTimeouts,
}

impl Coordinator {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn SegmentationStore>,
        registry: Arc<ModelRegistry>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            queue,
            store,
            registry,
            layout: config.storage.clone(),
            timeouts: JobTimeouts {
                preprocessing: config.preprocessing_timeout,
                prediction: config.prediction_timeout,
            },
        }
    }

    pub async fn submit(&self, request: &SubmitSegmentation) -> Result<Submission, PipelineError> {
        request.check()?;
        let model = self.registry.get(&request.model)?;
        let project = self
            .store
            .find_project(request.project_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("project", request.project_id))?;
        let file_format = project.format()?;
        let selection = self
            .resolve_sequences(project.id, &request.sequences, &model.necessary_sequences)
            .await?;

        let combination = selection.combination_key();
        let (preprocessing_key, reusable) = if model.skip_preprocessing {
            (format!("{RAW_KEY_PREFIX}{combination}"), None)
        } else {
            let reusable = self.store.find_reusable(project.id, &combination).await?;
            (combination, reusable)
        };

        let segmentation = self
            .store
            .create_segmentation(&CreateSegmentation {
                project_id: project.id,
                name: request.name.clone(),
                model_id: model.id.clone(),
                sequences: selection.ids(),
                preprocessing_key: preprocessing_key.clone(),
                display_values_id: reusable.as_ref().and_then(|r| r.display_values_id),
            })
            .await?;
        let segmentation_id = segmentation.id;
        tracing::info!(
            segmentation_id,
            project_id = project.id,
            model = %model.id,
            key = %preprocessing_key,
            reuses = ?reusable.as_ref().map(|r| r.id),
            "Segmentation created"
        );

        let result_dir = self.layout.segmentation_dir(project.id, segmentation_id);
        if let Err(e) = create_result_dir(&result_dir).await {
            self.compensate(segmentation_id, None, &[]).await;
            return Err(e);
        }

        let plan = Plan {
            model,
            file_format,
            selection,
            preprocessed_dir: self.layout.preprocessed_dir(project.id, &preprocessing_key),
            segmentation,
            reusable,
            result_dir,
        };

        let mut enqueued = Vec::new();
        match self.wire_jobs(&plan, &mut enqueued).await {
            Ok(submission) => Ok(submission),
            Err(e) => {
                tracing::warn!(segmentation_id, error = %e, "Submission failed, compensating");
                self.compensate(segmentation_id, Some(&plan.result_dir), &enqueued)
                    .await;
                Err(e)
            }
        }
    }

    pub async fn get_status(&self, segmentation_id: DbId) -> Result<SegmentationStatus, PipelineError> {
        Ok(self.get_segmentation(segmentation_id).await?.status()?)
    }

    pub async fn get_segmentation(&self, segmentation_id: DbId) -> Result<Segmentation, PipelineError> {
        self.store
            .find_segmentation(segmentation_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("segmentation", segmentation_id))
    }

    pub async fn list_segmentations(&self, project_id: DbId) -> Result<Vec<Segmentation>, PipelineError> {
        if self.store.find_project(project_id).await?.is_none() {
            return Err(PipelineError::not_found("project", project_id));
        }
        Ok(self.store.list_segmentations(project_id).await?)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Resolve the model's sequences to rows of `project_id`. Sequences the
    /// model does not read are dropped.
    async fn resolve_sequences(
        &self,
        project_id: DbId,
        requested: &SequenceIds,
        necessary: &[SequenceKind],
    ) -> Result<SequenceSelection, PipelineError> {
        let requested = requested.restricted_to(necessary);
        let missing = requested.missing(necessary);
        if !missing.is_empty() {
            let names: Vec<_> = missing.iter().map(|kind| kind.as_str()).collect();
            return Err(PipelineError::Validation(format!(
                "Missing required sequences: {}",
                names.join(", ")
            )));
        }

        let ids: Vec<DbId> = requested.present().map(|(_, id)| *id).collect();
        let rows = self.store.find_sequences(&ids).await?;

        let mut selection = SequenceSelection::default();
        for (kind, id) in requested.present() {
            let row = rows.iter().find(|row| row.id == *id).ok_or_else(|| {
                PipelineError::Validation(format!("Sequence {id} given as {kind} does not exist"))
            })?;
            if row.project_id != project_id {
                return Err(PipelineError::Validation(format!(
                    "Sequence {id} does not belong to project {project_id}"
                )));
            }
            selection.set(kind, row.to_ref());
        }
        Ok(selection)
    }

    async fn wire_jobs(
        &self,
        plan: &Plan<'_>,
        enqueued: &mut Vec<JobId>,
    ) -> Result<Submission, PipelineError> {
        let segmentation_id = plan.segmentation.id;

        let preprocessing_job_id = if plan.model.skip_preprocessing {
            self.stage_raw_inputs(plan).await?;
            None
        } else {
            match self.reusable_dependency(plan.reusable.as_ref()).await? {
                Reuse::Pending(job_id) => Some(job_id),
                Reuse::Finished => None,
                Reuse::Unavailable => {
                    let job_id = self.enqueue_preprocessing(plan).await?;
                    enqueued.push(job_id);
                    Some(job_id)
                }
            }
        };

        let prediction = PredictionJobInput {
            segmentation_id,
            model_id: plan.model.id.clone(),
            sequences: plan.model.necessary_sequences.clone(),
            preprocessed_dir: plan.preprocessed_dir.clone(),
            result_dir: plan.result_dir.clone(),
        };
        let handle = self
            .queue
            .enqueue(EnqueueRequest::prediction(
                &prediction,
                preprocessing_job_id,
                self.timeouts.prediction,
            )?)
            .await?;
        enqueued.push(handle.id);

        let recorded = self
            .store
            .set_job_ids(segmentation_id, preprocessing_job_id, Some(handle.id))
            .await?;
        if !recorded {
            return Err(PipelineError::not_found("segmentation", segmentation_id));
        }

        tracing::info!(
            segmentation_id,
            preprocessing_job_id = ?preprocessing_job_id,
            prediction_job_id = handle.id,
            "Segmentation jobs queued"
        );
        Ok(Submission {
            segmentation_id,
            preprocessing_job_id,
            prediction_job_id: handle.id,
            status: SegmentationStatus::Queueing,
        })
    }

    /// How the preprocessing of a reusable segmentation can be shared.
    async fn reusable_dependency(
        &self,
        reusable: Option<&Segmentation>,
    ) -> Result<Reuse, PipelineError> {
        let Some(reusable) = reusable else {
            return Ok(Reuse::Unavailable);
        };
        if reusable.prediction_job_id.is_none() {
            // Another submission is still wiring its jobs.
            return Ok(Reuse::Unavailable);
        }
        let Some(job_id) = reusable.preprocessing_job_id else {
            // Reused finished work itself; its inputs are on disk.
            return Ok(Reuse::Finished);
        };
        Ok(match self.queue.fetch(job_id).await? {
            Some(job) if job.status == JobStatus::Finished => Reuse::Finished,
            Some(job) if !job.status.is_terminal() => Reuse::Pending(job_id),
            // Failed, or removed together with its segmentation.
            _ => Reuse::Unavailable,
        })
    }

    async fn enqueue_preprocessing(&self, plan: &Plan<'_>) -> Result<JobId, PipelineError> {
        let project_id = plan.segmentation.project_id;
        let display_values_id = plan.segmentation.display_values_id.ok_or_else(|| {
            PipelineError::Validation(format!(
                "Segmentation {} has no display values",
                plan.segmentation.id
            ))
        })?;
        let input = PreprocessingJobInput {
            segmentation_id: plan.segmentation.id,
            display_values_id,
            file_format: plan.file_format,
            sequences: plan.selection.clone(),
            raw_dir: self.layout.project_dir(project_id).join("raw"),
            preprocessed_dir: plan.preprocessed_dir.clone(),
        };
        let handle = self
            .queue
            .enqueue(EnqueueRequest::preprocessing(
                &input,
                self.timeouts.preprocessing,
            )?)
            .await?;
        Ok(handle.id)
    }

    /// Copy raw NIfTI uploads to `{preprocessed}/{sequence}.nii.gz`.
    async fn stage_raw_inputs(&self, plan: &Plan<'_>) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&plan.preprocessed_dir).await?;
        for (kind, sequence) in plan.selection.present() {
            let source = self
                .layout
                .raw_sequence_dir(plan.segmentation.project_id, &sequence.dir_name())
                .join(sequence.nifti_file_name());
            let dest = plan.preprocessed_dir.join(format!("{kind}.nii.gz"));
            match tokio::fs::copy(&source, &dest).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(PipelineError::NotFound(format!(
                        "raw volume {}",
                        source.display()
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Undo a partially completed submission. Failures here are logged; the
    /// original error is what the caller sees.
    async fn compensate(&self, segmentation_id: DbId, result_dir: Option<&Path>, jobs: &[JobId]) {
        for job_id in jobs.iter().rev() {
            if let Err(e) = self.queue.remove(*job_id).await {
                tracing::error!(segmentation_id, job_id, error = %e, "Failed to remove job");
            }
        }
        if let Some(dir) = result_dir {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!(
                        segmentation_id,
                        dir = %dir.display(),
                        error = %e,
                        "Failed to remove segmentation directory"
                    );
                }
            }
        }
        if let Err(e) = self.store.delete_segmentation(segmentation_id).await {
            tracing::error!(segmentation_id, error = %e, "Failed to delete segmentation row");
        }
    }
}

enum Reuse {
    /// Depend on this still pending or running job.
    Pending(JobId),
    /// Preprocessed data is already on disk.
    Finished,
    /// Nothing to reuse; preprocess again.
    Unavailable,
}

/// Create the dedicated output directory. It must not exist yet.
async fn create_result_dir(dir: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = dir.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::create_dir(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(PipelineError::Conflict(
            format!("Output directory {} already exists", dir.display()),
        )),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn result_dir_must_be_new() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("projects/1/segmentations/4");

        create_result_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_matches!(
            create_result_dir(&dir).await,
            Err(PipelineError::Conflict(msg)) if msg.contains("already exists")
        );
    }
}
