//! Shared harness for worker tests: in-memory backends, a fake container
//! runtime and a converter that never shells out.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use brainns_core::display::IntensityRange;
use brainns_core::gpu::{AcquirePolicy, GpuSnapshot};
use brainns_core::job_payload::FileFormat;
use brainns_core::model_registry::ModelRegistry;
use brainns_core::sequence::{SequenceIds, SequenceKind};
use brainns_core::status::SegmentationStatus;
use brainns_core::submission::SubmitSegmentation;
use brainns_core::types::DbId;
use brainns_db::models::project::Project;
use brainns_db::models::sequence::Sequence;
use brainns_docker::testing::FakeRuntime;
use brainns_gpu::{GpuAllocator, StaticProbe};
use brainns_pipeline::queue::MemoryJobQueue;
use brainns_pipeline::store::MemoryStore;
use brainns_pipeline::{
    status_channel, Coordinator, PipelineConfig, RetryPolicy, SegmentationStore, StatusEvent,
    StatusUpdater, Submission,
};
use brainns_worker::{JobContext, JobError, JobSettings, VolumeConverter, WorkerLoop};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub const REGISTRY: &str = r#"{
  "models": [
    {
      "id": "nnunet-brats",
      "image": "nnunet:brainns",
      "dockerfile_path": "/opt/models/nnunet",
      "necessary_sequences": ["flair", "t1", "t1km", "t2"],
      "uses_gpu": true,
      "command": ["predict", "--id", "{segmentation_id}"],
      "output_path": "/app/output",
      "container_prefix": "nn_unet",
      "export_dicom": true
    },
    {
      "id": "synthseg",
      "image": "synthseg:brainns",
      "dockerfile_path": "/opt/models/synthseg",
      "necessary_sequences": ["t2"],
      "skip_preprocessing": true,
      "output_path": "/app/output",
      "container_prefix": "synth_seg"
    }
  ]
}"#;

pub const CONTAINER_USER: &str = "1000:1000";

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Writes one slice per conversion and reports a fixed range.
#[derive(Default)]
pub struct FakeConverter {
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl FakeConverter {
    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VolumeConverter for FakeConverter {
    async fn nifti_to_dicom(&self, source: &Path, dest_dir: &Path) -> Result<IntensityRange, JobError> {
        if !source.is_file() {
            return Err(JobError::Conversion(format!("{} missing", source.display())));
        }
        tokio::fs::create_dir_all(dest_dir).await?;
        tokio::fs::write(dest_dir.join("IM0001.dcm"), b"dicom").await?;
        self.calls
            .lock()
            .unwrap()
            .push((source.to_path_buf(), dest_dir.to_path_buf()));
        Ok(IntensityRange { min: 0.0, max: 100.0 })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub root: TempDir,
    pub config: PipelineConfig,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub runtime: Arc<FakeRuntime>,
    pub converter: Arc<FakeConverter>,
    pub probe: Arc<StaticProbe>,
    pub coordinator: Coordinator,
    pub worker: WorkerLoop,
    pub updater: StatusUpdater,
    pub events: UnboundedReceiver<StatusEvent>,
    pub project: Project,
}

pub struct HarnessOptions {
    pub file_format: FileFormat,
    pub gpus: Vec<GpuSnapshot>,
    pub prediction_timeout: Option<Duration>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            file_format: FileFormat::Nifti,
            gpus: vec![GpuSnapshot {
                index: 0,
                load: 0.0,
                memory_used: 0.1,
            }],
            prediction_timeout: None,
        }
    }
}

pub fn harness() -> Harness {
    harness_with(HarnessOptions::default())
}

pub fn harness_with(options: HarnessOptions) -> Harness {
    let root = TempDir::new().unwrap();
    let mut config = PipelineConfig::for_root(root.path());
    if let Some(timeout) = options.prediction_timeout {
        config.prediction_timeout = timeout;
    }

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let runtime = Arc::new(FakeRuntime::new());
    let converter = Arc::new(FakeConverter::default());
    let probe = Arc::new(StaticProbe::fixed(options.gpus));
    let registry = Arc::new(ModelRegistry::from_json(REGISTRY).unwrap());
    let (notifier, events) = status_channel();

    let coordinator = Coordinator::new(queue.clone(), store.clone(), registry.clone(), &config);
    let ctx = JobContext {
        runtime: runtime.clone(),
        allocator: GpuAllocator::new(probe.clone()),
        store: store.clone(),
        notifier,
        registry,
        converter: converter.clone(),
        layout: config.storage.clone(),
        settings: JobSettings {
            container_user: Some(CONTAINER_USER.to_string()),
            gpu: AcquirePolicy {
                attempts: 2,
                interval: Duration::ZERO,
                ..AcquirePolicy::default()
            },
            ..JobSettings::default()
        },
    };
    let worker = WorkerLoop::new("worker-test-0", queue.clone(), ctx)
        .with_poll_interval(Duration::from_millis(10))
        .with_retry(RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        });
    let updater = StatusUpdater::new(store.clone());
    let project = store.add_project("glioma-study", options.file_format);

    Harness {
        root,
        config,
        store,
        queue,
        runtime,
        converter,
        probe,
        coordinator,
        worker,
        updater,
        events,
        project,
    }
}

impl Harness {
    /// Upload one sequence of `kind` in the project's file format.
    pub fn upload(&self, kind: SequenceKind) -> Sequence {
        let sequence = self.store.add_sequence(self.project.id, kind.as_str());
        let sequence_ref = sequence.to_ref();
        let dir = self
            .config
            .storage
            .raw_sequence_dir(self.project.id, &sequence_ref.dir_name());
        std::fs::create_dir_all(&dir).unwrap();
        match self.project.format().unwrap() {
            FileFormat::Nifti => {
                std::fs::write(dir.join(sequence_ref.nifti_file_name()), b"nifti").unwrap();
            }
            FileFormat::Dicom => {
                for n in 0..2 {
                    std::fs::write(dir.join(format!("IM{n:04}.dcm")), b"dicom").unwrap();
                }
            }
        }
        sequence
    }

    pub fn upload_all(&self) -> SequenceIds {
        let mut ids = SequenceIds::default();
        for kind in SequenceKind::ALL {
            ids.set(kind, self.upload(kind).id);
        }
        ids
    }

    pub async fn submit(&self, model: &str, sequences: SequenceIds) -> Submission {
        self.coordinator
            .submit(&SubmitSegmentation {
                project_id: self.project.id,
                name: "tumour".into(),
                model: model.into(),
                sequences,
            })
            .await
            .unwrap()
    }

    /// Run queued jobs until none is left. Returns how many ran.
    pub async fn drain_queue(&self) -> usize {
        let mut ran = 0;
        while self.worker.run_once().await.unwrap() {
            ran += 1;
        }
        ran
    }

    /// Apply every published status event. Returns them in order.
    pub async fn apply_events(&mut self) -> Vec<StatusEvent> {
        let mut applied = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            self.updater.apply(&event).await.unwrap();
            applied.push(event);
        }
        applied
    }

    pub async fn status(&self, segmentation_id: DbId) -> SegmentationStatus {
        self.store
            .find_segmentation(segmentation_id)
            .await
            .unwrap()
            .unwrap()
            .status()
            .unwrap()
    }

    pub fn result_dir(&self, segmentation_id: DbId) -> PathBuf {
        self.config
            .storage
            .segmentation_dir(self.project.id, segmentation_id)
    }

    pub fn preprocessed_dir(&self, key: &str) -> PathBuf {
        self.config.storage.preprocessed_dir(self.project.id, key)
    }
}
