//! End-to-end job runs against the fake container runtime.

mod common;

use std::time::Duration;

use brainns_core::gpu::GpuSnapshot;
use brainns_core::job_payload::{FileFormat, JobCallback, JobKind};
use brainns_core::naming::{ContainerName, ContainerPrefix};
use brainns_core::sequence::{SequenceIds, SequenceKind};
use brainns_core::status::SegmentationStatus;
use brainns_core::storage::{CONTAINER_LOG_FILE, DICOM_BUNDLE_FILE, DICOM_DIR};
use brainns_core::types::DbId;
use brainns_db::models::status::JobStatus;
use brainns_docker::testing::{FakeBehaviour, RuntimeEvent};
use brainns_docker::{ContainerRuntime, DeviceRequest};
use brainns_pipeline::{JobQueue, SegmentationStore, StatusEvent};
use common::{harness, harness_with, Harness, HarnessOptions, CONTAINER_USER};

const REGISTERED: [&str; 4] = [
    "nifti_flair_register.nii.gz",
    "nifti_t1_register.nii.gz",
    "nifti_t1c_register.nii.gz",
    "nifti_t2_register.nii.gz",
];

fn container(prefix: ContainerPrefix, segmentation_id: DbId) -> String {
    ContainerName::new(prefix, segmentation_id).to_string()
}

async fn preprocessing_key(h: &Harness, segmentation_id: DbId) -> String {
    h.store
        .find_segmentation(segmentation_id)
        .await
        .unwrap()
        .unwrap()
        .preprocessing_key
}

fn script_success(h: &Harness) {
    h.runtime.script(
        ContainerPrefix::Preprocessing,
        FakeBehaviour::succeed_with(&REGISTERED).with_logs(&["registering", "skull stripping"]),
    );
    h.runtime.script(
        ContainerPrefix::NnUnet,
        FakeBehaviour::succeed_with(&["segmentation.nii.gz"]),
    );
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_pipeline_reaches_done() {
    let mut h = harness();
    script_success(&h);
    let submission = h.submit("nnunet-brats", h.upload_all()).await;
    let id = submission.segmentation_id;

    assert_eq!(h.drain_queue().await, 2);
    let events = h.apply_events().await;

    assert_eq!(
        events,
        vec![
            StatusEvent::Advance {
                segmentation_id: id,
                status: SegmentationStatus::Preprocessing,
            },
            StatusEvent::Advance {
                segmentation_id: id,
                status: SegmentationStatus::Predicting,
            },
            StatusEvent::Callback {
                segmentation_id: id,
                job_id: submission.prediction_job_id,
                action: JobCallback::MarkDone,
            },
        ]
    );
    assert_eq!(h.status(id).await, SegmentationStatus::Done);

    for job in h.queue.jobs() {
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.worker_id.as_deref(), Some("worker-test-0"));
    }
}

#[tokio::test]
async fn preprocessing_leaves_copies_series_and_bundle() {
    let mut h = harness();
    script_success(&h);
    let submission = h.submit("nnunet-brats", h.upload_all()).await;
    h.drain_queue().await;
    h.apply_events().await;

    let dir = h.preprocessed_dir(&preprocessing_key(&h, submission.segmentation_id).await);
    for kind in SequenceKind::ALL {
        assert!(dir.join(format!("{kind}.nii.gz")).is_file(), "{kind} copy");
        assert!(dir.join(DICOM_DIR).join(kind.as_str()).join("IM0001.dcm").is_file());
    }
    assert!(dir.join(DICOM_DIR).join(DICOM_BUNDLE_FILE).is_file());

    let log = std::fs::read_to_string(dir.join(CONTAINER_LOG_FILE)).unwrap();
    assert_eq!(log, "registering\nskull stripping\n");

    let row = h
        .store
        .find_segmentation(submission.segmentation_id)
        .await
        .unwrap()
        .unwrap();
    let channels = h
        .store
        .find_display_values(row.display_values_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(channels.len(), 4);
    assert_eq!(channels[&SequenceKind::T1km].max, 100.0);
}

#[tokio::test]
async fn containers_get_inputs_mounts_and_devices() {
    let h = harness();
    script_success(&h);
    let submission = h.submit("nnunet-brats", h.upload_all()).await;
    let id = submission.segmentation_id;
    h.drain_queue().await;

    let staged = h.runtime.staged();
    assert_eq!(staged.len(), 2);

    let preprocessing = &staged[0];
    assert_eq!(preprocessing.container, container(ContainerPrefix::Preprocessing, id));
    assert_eq!(preprocessing.dest_path, "/app/input/nifti");
    let mut entries = preprocessing.entries.clone();
    entries.sort();
    assert_eq!(
        entries,
        vec![
            "nifti_flair.nii.gz",
            "nifti_t1.nii.gz",
            "nifti_t1c.nii.gz",
            "nifti_t2.nii.gz"
        ]
    );

    let prediction = &staged[1];
    assert_eq!(prediction.container, container(ContainerPrefix::NnUnet, id));
    assert_eq!(prediction.dest_path, "/app/input");
    assert_eq!(
        prediction.entries,
        vec!["_0000.nii.gz", "_0001.nii.gz", "_0002.nii.gz", "_0003.nii.gz"]
    );

    let result_dir = h.result_dir(id);
    assert!(result_dir.join("segmentation.nii.gz").is_file());
    assert!(result_dir.join(DICOM_DIR).join("IM0001.dcm").is_file());
    assert_eq!(h.converter.calls().len(), 5);
    assert_eq!(h.runtime.builds(), vec!["preprocessing:brainns", "nnunet:brainns"]);
    assert!(h.probe.calls() >= 1);
}

#[tokio::test]
async fn prediction_is_created_only_after_preprocessing_exits() {
    let h = harness();
    script_success(&h);
    let submission = h.submit("nnunet-brats", h.upload_all()).await;
    let id = submission.segmentation_id;
    h.drain_queue().await;

    let preprocessing_exit = h
        .runtime
        .position(&RuntimeEvent::Exited {
            name: container(ContainerPrefix::Preprocessing, id),
            status_code: 0,
        })
        .unwrap();
    let prediction_created = h
        .runtime
        .position(&RuntimeEvent::Created(container(ContainerPrefix::NnUnet, id)))
        .unwrap();
    assert!(preprocessing_exit < prediction_created);
}

#[tokio::test]
async fn running_prediction_gets_gpu_user_and_result_mount() {
    let h = harness();
    h.runtime
        .script(ContainerPrefix::Preprocessing, FakeBehaviour::succeed_with(&REGISTERED));
    h.runtime.script(ContainerPrefix::NnUnet, FakeBehaviour::hold());
    let submission = h.submit("nnunet-brats", h.upload_all()).await;
    let id = submission.segmentation_id;
    assert!(h.worker.run_once().await.unwrap());

    let name = container(ContainerPrefix::NnUnet, id);
    let inspect = async {
        let spec = loop {
            if h.runtime.position(&RuntimeEvent::Started(name.clone())).is_some() {
                if let Some(spec) = h.runtime.spec_of(&name) {
                    break spec;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        let handles = h
            .runtime
            .find_by_name_suffix(&ContainerPrefix::ALL, id)
            .await
            .unwrap();
        h.runtime.stop(&handles[0], true).await.unwrap();
        spec
    };

    let (claimed, spec) = tokio::join!(h.worker.run_once(), inspect);
    assert!(claimed.unwrap());

    assert_eq!(spec.device_requests, vec![DeviceRequest::nvidia_gpu(0)]);
    assert_eq!(spec.user.as_deref(), Some(CONTAINER_USER));
    assert_eq!(spec.command, vec!["predict", "--id", id.to_string().as_str()]);
    assert!(spec.auto_remove);
    assert_eq!(spec.volumes[0].host_path, h.result_dir(id));
    assert_eq!(spec.volumes[0].container_path, "/app/output");

    // Stopped mid-run without a result.
    let job = h.queue.fetch(submission.prediction_job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn model_exiting_cleanly_without_output_is_an_error() {
    let mut h = harness();
    h.runtime
        .script(ContainerPrefix::Preprocessing, FakeBehaviour::succeed_with(&REGISTERED));
    h.runtime.script(
        ContainerPrefix::NnUnet,
        FakeBehaviour::succeed_with(&[]).with_logs(&["CUDA out of memory"]),
    );
    let submission = h.submit("nnunet-brats", h.upload_all()).await;
    let id = submission.segmentation_id;

    assert_eq!(h.drain_queue().await, 2);
    h.apply_events().await;

    assert_eq!(h.status(id).await, SegmentationStatus::Error);
    let job = h.queue.fetch(submission.prediction_job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let message = job.error_message.unwrap();
    assert!(message.contains("no .nii.gz result produced"), "{message}");
    assert!(message.contains(CONTAINER_LOG_FILE), "{message}");

    let log = std::fs::read_to_string(h.result_dir(id).join(CONTAINER_LOG_FILE)).unwrap();
    assert!(log.contains("CUDA out of memory"));
}

#[tokio::test]
async fn failed_preprocessing_fails_its_prediction_without_running_it() {
    let mut h = harness();
    h.runtime
        .script(ContainerPrefix::Preprocessing, FakeBehaviour::exit_with(1));
    let submission = h.submit("nnunet-brats", h.upload_all()).await;
    let id = submission.segmentation_id;
    let preprocessing_id = submission.preprocessing_job_id.unwrap();

    assert_eq!(h.drain_queue().await, 1);
    let events = h.apply_events().await;

    assert_eq!(
        events[1..],
        [
            StatusEvent::Callback {
                segmentation_id: id,
                job_id: preprocessing_id,
                action: JobCallback::MarkError,
            },
            StatusEvent::Callback {
                segmentation_id: id,
                job_id: submission.prediction_job_id,
                action: JobCallback::MarkError,
            },
        ]
    );
    assert_eq!(h.status(id).await, SegmentationStatus::Error);

    let preprocessing = h.queue.fetch(preprocessing_id).await.unwrap().unwrap();
    assert!(preprocessing
        .error_message
        .unwrap()
        .contains("exited with status 1"));
    let prediction = h.queue.fetch(submission.prediction_job_id).await.unwrap().unwrap();
    assert_eq!(prediction.status, JobStatus::Failed);
    assert_eq!(
        h.runtime
            .position(&RuntimeEvent::Created(container(ContainerPrefix::NnUnet, id))),
        None
    );
}

#[tokio::test]
async fn missing_registered_output_fails_preprocessing() {
    let mut h = harness();
    h.runtime.script(
        ContainerPrefix::Preprocessing,
        FakeBehaviour::succeed_with(&REGISTERED[..3]),
    );
    let submission = h.submit("nnunet-brats", h.upload_all()).await;

    h.drain_queue().await;
    h.apply_events().await;

    assert_eq!(h.status(submission.segmentation_id).await, SegmentationStatus::Error);
    let job = h
        .queue
        .fetch(submission.preprocessing_job_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(job
        .error_message
        .unwrap()
        .contains("nifti_t2_register.nii.gz"));
    assert!(h.converter.calls().is_empty());
}

#[tokio::test]
async fn busy_gpus_fail_the_prediction() {
    let mut h = harness_with(HarnessOptions {
        gpus: vec![GpuSnapshot {
            index: 0,
            load: 0.95,
            memory_used: 0.9,
        }],
        ..HarnessOptions::default()
    });
    script_success(&h);
    let submission = h.submit("nnunet-brats", h.upload_all()).await;

    h.drain_queue().await;
    h.apply_events().await;

    assert_eq!(h.status(submission.segmentation_id).await, SegmentationStatus::Error);
    let job = h.queue.fetch(submission.prediction_job_id).await.unwrap().unwrap();
    assert!(job.error_message.unwrap().starts_with("GPU unavailable"));
    assert_eq!(h.probe.calls(), 2);
}

#[tokio::test]
async fn timed_out_prediction_is_killed() {
    let mut h = harness_with(HarnessOptions {
        prediction_timeout: Some(Duration::from_millis(50)),
        ..HarnessOptions::default()
    });
    h.runtime.script(ContainerPrefix::SynthSeg, FakeBehaviour::hold());
    let mut sequences = SequenceIds::default();
    sequences.set(SequenceKind::T2, h.upload(SequenceKind::T2).id);
    let submission = h.submit("synthseg", sequences).await;
    let id = submission.segmentation_id;

    assert_eq!(h.drain_queue().await, 1);
    h.apply_events().await;

    assert_eq!(h.status(id).await, SegmentationStatus::Error);
    assert_eq!(
        h.runtime.stopped(),
        vec![container(ContainerPrefix::SynthSeg, id)]
    );
    assert!(h
        .runtime
        .position(&RuntimeEvent::Stopped {
            name: container(ContainerPrefix::SynthSeg, id),
            graceful: false,
        })
        .is_some());
    let job = h.queue.fetch(submission.prediction_job_id).await.unwrap().unwrap();
    assert!(job.error_message.unwrap().contains("timeout"));
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn skipped_preprocessing_feeds_raw_volume_to_model() {
    let mut h = harness();
    h.runtime.script(
        ContainerPrefix::SynthSeg,
        FakeBehaviour::succeed_with(&["labels.nii.gz"]),
    );
    let mut sequences = SequenceIds::default();
    sequences.set(SequenceKind::T2, h.upload(SequenceKind::T2).id);
    let submission = h.submit("synthseg", sequences).await;
    let id = submission.segmentation_id;

    assert_eq!(h.drain_queue().await, 1);
    h.apply_events().await;

    assert_eq!(h.status(id).await, SegmentationStatus::Done);
    let staged = h.runtime.staged();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].entries, vec!["_0000.nii.gz"]);
    // No GPU and no DICOM export for this model.
    assert_eq!(h.probe.calls(), 0);
    assert!(h.converter.calls().is_empty());
    assert_eq!(h.runtime.builds(), vec!["synthseg:brainns"]);
}

#[tokio::test]
async fn dicom_uploads_are_staged_as_series_directories() {
    let mut h = harness_with(HarnessOptions {
        file_format: FileFormat::Dicom,
        ..HarnessOptions::default()
    });
    script_success(&h);
    let submission = h.submit("nnunet-brats", h.upload_all()).await;

    h.drain_queue().await;
    h.apply_events().await;
    assert_eq!(h.status(submission.segmentation_id).await, SegmentationStatus::Done);

    let staged = &h.runtime.staged()[0];
    assert_eq!(staged.dest_path, "/app/input/dicom");
    for tag in ["flair", "t1", "t1c", "t2"] {
        assert!(
            staged
                .entries
                .iter()
                .any(|entry| entry.starts_with(&format!("{tag}/IM"))),
            "{tag}: {:?}",
            staged.entries
        );
    }
}

#[tokio::test]
async fn shared_preprocessing_runs_once_for_two_segmentations() {
    let mut h = harness();
    script_success(&h);
    let sequences = h.upload_all();
    let first = h.submit("nnunet-brats", sequences).await;
    let second = h.submit("nnunet-brats", sequences).await;
    assert_eq!(second.preprocessing_job_id, first.preprocessing_job_id);

    assert_eq!(h.drain_queue().await, 3);
    h.apply_events().await;

    assert_eq!(h.status(first.segmentation_id).await, SegmentationStatus::Done);
    assert_eq!(h.status(second.segmentation_id).await, SegmentationStatus::Done);
    let preprocessing_runs = h
        .queue
        .jobs()
        .iter()
        .filter(|job| job.kind == JobKind::Preprocess)
        .count();
    assert_eq!(preprocessing_runs, 1);
}

#[tokio::test]
async fn stale_registered_volumes_do_not_satisfy_a_rerun() {
    let mut h = harness();
    h.runtime.script(
        ContainerPrefix::Preprocessing,
        FakeBehaviour::succeed_with(&REGISTERED[..3]),
    );
    let submission = h.submit("nnunet-brats", h.upload_all()).await;
    let dir = h.preprocessed_dir(&preprocessing_key(&h, submission.segmentation_id).await);
    std::fs::create_dir_all(&dir).unwrap();
    for name in REGISTERED {
        std::fs::write(dir.join(name), b"left by an earlier run").unwrap();
    }

    h.drain_queue().await;
    h.apply_events().await;

    assert_eq!(h.status(submission.segmentation_id).await, SegmentationStatus::Error);
    let job = h
        .queue
        .fetch(submission.preprocessing_job_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(job
        .error_message
        .unwrap()
        .contains("nifti_t2_register.nii.gz"));
    assert!(!dir.join("nifti_t2_register.nii.gz").exists());
    assert_eq!(
        std::fs::read(dir.join(REGISTERED[0])).unwrap(),
        b"fake output".to_vec()
    );
}

#[tokio::test]
async fn prediction_for_deleted_output_directory_fails_without_recreating_it() {
    let mut h = harness();
    let mut sequences = SequenceIds::default();
    sequences.set(SequenceKind::T2, h.upload(SequenceKind::T2).id);
    let submission = h.submit("synthseg", sequences).await;
    let id = submission.segmentation_id;
    std::fs::remove_dir_all(h.result_dir(id)).unwrap();

    assert_eq!(h.drain_queue().await, 1);
    h.apply_events().await;

    assert!(!h.result_dir(id).exists());
    assert_eq!(h.status(id).await, SegmentationStatus::Error);
    let job = h
        .queue
        .fetch(submission.prediction_job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("no longer exists"));
    assert!(h.runtime.container_names().is_empty());
    assert!(h.runtime.builds().is_empty());
}

// ---------------------------------------------------------------------------
// Outcome reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finished_job_survives_a_queue_outage_while_reporting() {
    let mut h = harness();
    h.runtime.script(
        ContainerPrefix::SynthSeg,
        FakeBehaviour::succeed_with(&["labels.nii.gz"]),
    );
    let mut sequences = SequenceIds::default();
    sequences.set(SequenceKind::T2, h.upload(SequenceKind::T2).id);
    let submission = h.submit("synthseg", sequences).await;
    h.queue.reject_reports(2);

    assert_eq!(h.drain_queue().await, 1);
    let events = h.apply_events().await;

    assert_eq!(
        events.last(),
        Some(&StatusEvent::Callback {
            segmentation_id: submission.segmentation_id,
            job_id: submission.prediction_job_id,
            action: JobCallback::MarkDone,
        })
    );
    assert_eq!(h.status(submission.segmentation_id).await, SegmentationStatus::Done);
    let job = h
        .queue
        .fetch(submission.prediction_job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Finished);
}

#[tokio::test]
async fn failed_job_survives_a_queue_outage_while_reporting() {
    let mut h = harness();
    h.runtime
        .script(ContainerPrefix::SynthSeg, FakeBehaviour::exit_with(3));
    let mut sequences = SequenceIds::default();
    sequences.set(SequenceKind::T2, h.upload(SequenceKind::T2).id);
    let submission = h.submit("synthseg", sequences).await;
    h.queue.reject_reports(1);

    assert_eq!(h.drain_queue().await, 1);
    h.apply_events().await;

    assert_eq!(h.status(submission.segmentation_id).await, SegmentationStatus::Error);
    let job = h
        .queue
        .fetch(submission.prediction_job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn outage_longer_than_the_retries_is_reported_to_the_caller() {
    let h = harness();
    h.runtime.script(
        ContainerPrefix::SynthSeg,
        FakeBehaviour::succeed_with(&["labels.nii.gz"]),
    );
    let mut sequences = SequenceIds::default();
    sequences.set(SequenceKind::T2, h.upload(SequenceKind::T2).id);
    let submission = h.submit("synthseg", sequences).await;
    h.queue.reject_reports(3);

    let err = h.worker.run_once().await.unwrap_err();
    assert!(err.is_transient());
    let job = h
        .queue
        .fetch(submission.prediction_job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Started);
}
