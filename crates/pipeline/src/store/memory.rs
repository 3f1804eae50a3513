//! In-process [`SegmentationStore`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use brainns_core::display::DisplayChannels;
use brainns_core::job_payload::FileFormat;
use brainns_core::status::{SegmentationStatus, StatusChange};
use brainns_core::types::{DbId, JobId};
use brainns_db::models::project::{DeletedProject, Project};
use brainns_db::models::segmentation::{CreateSegmentation, DeletedSegmentation, Segmentation};
use brainns_db::models::sequence::Sequence;
use chrono::Utc;

use super::{SegmentationStore, StoreError};

#[derive(Default)]
struct StoreState {
    next_id: DbId,
    projects: BTreeMap<DbId, Project>,
    sequences: BTreeMap<DbId, Sequence>,
    segmentations: BTreeMap<DbId, Segmentation>,
    display_values: BTreeMap<DbId, Option<DisplayChannels>>,
    /// Status updates that fail with `Unavailable` before one succeeds.
    failing_status_updates: usize,
}

impl StoreState {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    /// Remove `id` from `display_values` when no segmentation references it.
    fn drop_orphan_display_values(&mut self, id: DbId) -> bool {
        let referenced = self
            .segmentations
            .values()
            .any(|s| s.display_values_id == Some(id));
        !referenced && self.display_values.remove(&id).is_some()
    }
}

/// Shared id space across every table, so ids are unique store-wide.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&self, name: &str, file_format: FileFormat) -> Project {
        let mut state = self.lock();
        let now = Utc::now();
        let project = Project {
            id: state.next_id(),
            name: name.to_string(),
            file_format: file_format.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };
        state.projects.insert(project.id, project.clone());
        project
    }

    pub fn add_sequence(&self, project_id: DbId, name: &str) -> Sequence {
        let mut state = self.lock();
        let sequence = Sequence {
            id: state.next_id(),
            project_id,
            name: name.to_string(),
            sequence_type: Some(name.to_string()),
            created_at: Utc::now(),
        };
        state.sequences.insert(sequence.id, sequence.clone());
        sequence
    }

    /// Make the next `count` status updates fail as if the store were down.
    pub fn fail_status_updates(&self, count: usize) {
        self.lock().failing_status_updates = count;
    }

    pub fn segmentation_count(&self) -> usize {
        self.lock().segmentations.len()
    }

    pub fn display_values_count(&self) -> usize {
        self.lock().display_values.len()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SegmentationStore for MemoryStore {
    async fn find_project(&self, id: DbId) -> Result<Option<Project>, StoreError> {
        Ok(self.lock().projects.get(&id).cloned())
    }

    async fn find_sequences(&self, ids: &[DbId]) -> Result<Vec<Sequence>, StoreError> {
        let state = self.lock();
        Ok(state
            .sequences
            .values()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn create_segmentation(
        &self,
        input: &CreateSegmentation,
    ) -> Result<Segmentation, StoreError> {
        let mut state = self.lock();
        let display_values_id = match input.display_values_id {
            Some(id) => id,
            None => {
                let id = state.next_id();
                state.display_values.insert(id, None);
                id
            }
        };

        let now = Utc::now();
        let segmentation = Segmentation {
            id: state.next_id(),
            project_id: input.project_id,
            name: input.name.clone(),
            model_id: input.model_id.clone(),
            t1_id: input.sequences.t1,
            t1km_id: input.sequences.t1km,
            t2_id: input.sequences.t2,
            flair_id: input.sequences.flair,
            status_id: SegmentationStatus::Queueing.id(),
            preprocessing_key: input.preprocessing_key.clone(),
            preprocessing_job_id: None,
            prediction_job_id: None,
            display_values_id: Some(display_values_id),
            created_at: now,
            updated_at: now,
        };
        state
            .segmentations
            .insert(segmentation.id, segmentation.clone());
        Ok(segmentation)
    }

    async fn find_segmentation(&self, id: DbId) -> Result<Option<Segmentation>, StoreError> {
        Ok(self.lock().segmentations.get(&id).cloned())
    }

    async fn list_segmentations(&self, project_id: DbId) -> Result<Vec<Segmentation>, StoreError> {
        Ok(self
            .lock()
            .segmentations
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn find_reusable(
        &self,
        project_id: DbId,
        preprocessing_key: &str,
    ) -> Result<Option<Segmentation>, StoreError> {
        Ok(self
            .lock()
            .segmentations
            .values()
            .rev()
            .find(|s| {
                s.project_id == project_id
                    && s.preprocessing_key == preprocessing_key
                    && s.status_id != SegmentationStatus::Error.id()
            })
            .cloned())
    }

    async fn set_job_ids(
        &self,
        id: DbId,
        preprocessing_job_id: Option<JobId>,
        prediction_job_id: Option<JobId>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(segmentation) = state.segmentations.get_mut(&id) else {
            return Ok(false);
        };
        segmentation.preprocessing_job_id = preprocessing_job_id;
        segmentation.prediction_job_id = prediction_job_id;
        segmentation.updated_at = Utc::now();
        Ok(true)
    }

    async fn advance_status(
        &self,
        id: DbId,
        target: SegmentationStatus,
    ) -> Result<StatusChange, StoreError> {
        let mut state = self.lock();
        if state.failing_status_updates > 0 {
            state.failing_status_updates -= 1;
            return Err(StoreError::Unavailable("simulated outage".into()));
        }

        let Some(segmentation) = state.segmentations.get_mut(&id) else {
            return Ok(StatusChange::Missing);
        };
        let current = SegmentationStatus::from_id(segmentation.status_id).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "segmentation {id} has unknown status id {}",
                segmentation.status_id
            ))
        })?;

        let change = StatusChange::decide(current, target);
        if change.is_applied() {
            segmentation.status_id = target.id();
            segmentation.updated_at = Utc::now();
        }
        Ok(change)
    }

    async fn delete_segmentation(
        &self,
        id: DbId,
    ) -> Result<Option<DeletedSegmentation>, StoreError> {
        let mut state = self.lock();
        let Some(segmentation) = state.segmentations.remove(&id) else {
            return Ok(None);
        };
        let display_values_removed = segmentation
            .display_values_id
            .is_some_and(|dv| state.drop_orphan_display_values(dv));
        Ok(Some(DeletedSegmentation {
            id,
            project_id: segmentation.project_id,
            display_values_removed,
        }))
    }

    async fn delete_project(&self, id: DbId) -> Result<Option<DeletedProject>, StoreError> {
        let mut state = self.lock();
        if state.projects.remove(&id).is_none() {
            return Ok(None);
        }

        let segmentation_ids: Vec<DbId> = state
            .segmentations
            .values()
            .filter(|s| s.project_id == id)
            .map(|s| s.id)
            .collect();
        let mut display_value_ids = Vec::new();
        for segmentation_id in &segmentation_ids {
            if let Some(dv) = state
                .segmentations
                .remove(segmentation_id)
                .and_then(|s| s.display_values_id)
            {
                display_value_ids.push(dv);
            }
        }
        display_value_ids.sort_unstable();
        display_value_ids.dedup();
        let display_values = display_value_ids
            .into_iter()
            .filter(|dv| state.drop_orphan_display_values(*dv))
            .count();

        let before = state.sequences.len();
        state.sequences.retain(|_, s| s.project_id != id);
        let sequences = before - state.sequences.len();

        Ok(Some(DeletedProject {
            segmentations: segmentation_ids.len() as u64,
            sequences: sequences as u64,
            display_values: display_values as u64,
        }))
    }

    async fn record_display_values(
        &self,
        id: DbId,
        channels: &DisplayChannels,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.display_values.get_mut(&id) {
            Some(slot) if slot.is_none() => {
                *slot = Some(channels.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_display_values(&self, id: DbId) -> Result<Option<DisplayChannels>, StoreError> {
        Ok(self.lock().display_values.get(&id).cloned().flatten())
    }
}
