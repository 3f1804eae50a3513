use std::path::{Path, PathBuf};

use brainns_core::job_payload::PredictionJobInput;
use brainns_core::status::SegmentationStatus;
use brainns_core::storage::{CONTAINER_LOG_FILE, DICOM_DIR};
use brainns_docker::{ContainerSpec, DeviceRequest, VolumeBinding};

use super::{check_exit, run_container, stage};
use crate::context::JobContext;
use crate::error::JobError;

const MODEL_INPUT: &str = "/app/input";

/// File name of the `index`-th model input.
pub fn model_input_name(index: usize) -> String {
    format!("_{index:04}.nii.gz")
}

pub async fn run_prediction_job(ctx: &JobContext, input: PredictionJobInput) -> Result<(), JobError> {
    input.validate()?;
    let segmentation_id = input.segmentation_id;
    ctx.notifier
        .advance(segmentation_id, SegmentationStatus::Predicting);

    // Created at submission and removed only by a delete.
    if !tokio::fs::try_exists(&input.result_dir).await? {
        return Err(JobError::OutputMissing(input.result_dir));
    }

    let model = ctx.registry.get(&input.model_id)?.clone();
    ctx.runtime
        .ensure_image(&model.image, &model.dockerfile_path)
        .await?;

    let mut device_requests = Vec::new();
    if model.uses_gpu {
        let device = ctx.allocator.acquire(&ctx.settings.gpu).await?;
        tracing::info!(segmentation_id, device, model = %model.id, "GPU assigned");
        device_requests.push(DeviceRequest::nvidia_gpu(device));
    }

    let name = model.container_name(segmentation_id);
    let container = name.to_string();
    let spec = ContainerSpec {
        image: model.image.clone(),
        name,
        command: model.render_command(segmentation_id),
        volumes: vec![VolumeBinding::read_write(
            ctx.layout.to_host(&input.result_dir),
            model.output_path.clone(),
        )],
        device_requests,
        user: ctx.settings.container_user.clone(),
        auto_remove: true,
    };

    let sources: Vec<PathBuf> = input
        .sequences
        .iter()
        .map(|kind| input.preprocessed_dir.join(format!("{kind}.nii.gz")))
        .collect();
    let staged = stage(move |archive| {
        for (index, source) in sources.iter().enumerate() {
            archive.add_file(source, &model_input_name(index))?;
        }
        Ok(())
    })
    .await?;

    let log_path = input.result_dir.join(CONTAINER_LOG_FILE);
    let outcome = run_container(ctx, &spec, staged, MODEL_INPUT, &log_path).await?;
    check_exit(outcome, &container, &log_path)?;

    let Some(label) = find_label_volume(&input.result_dir).await? else {
        return Err(JobError::ContainerExecution {
            container,
            reason: "no .nii.gz result produced".into(),
            log_path,
        });
    };

    if model.export_dicom {
        ctx.converter
            .nifti_to_dicom(&label, &input.result_dir.join(DICOM_DIR))
            .await?;
    }

    tracing::info!(
        segmentation_id,
        model = %model.id,
        result = %label.display(),
        "Prediction finished"
    );
    Ok(())
}

/// First `.nii.gz` file directly inside `dir`, by name.
async fn find_label_volume(dir: &Path) -> Result<Option<PathBuf>, JobError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut volumes = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_volume = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".nii.gz"));
        if is_volume && entry.file_type().await?.is_file() {
            volumes.push(path);
        }
    }
    volumes.sort();
    Ok(volumes.into_iter().next())
}
