//! Registration and skull stripping of a sequence combination.
//!
//! Output layout under the preprocessed directory:
//!
//! ```text
//! nifti_{tag}_register.nii.gz   written by the container
//! {sequence}.nii.gz             copy read by prediction jobs
//! dicom/{sequence}/             converted series for the viewer
//! dicom/sequences.zip           every series in one bundle
//! container_logs.log
//! ```

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use brainns_core::display::DisplayChannels;
use brainns_core::job_payload::{FileFormat, PreprocessingJobInput};
use brainns_core::naming::{ContainerName, ContainerPrefix};
use brainns_core::sequence::{SequenceKind, SequenceRef};
use brainns_core::status::SegmentationStatus;
use brainns_core::storage::{CONTAINER_LOG_FILE, DICOM_BUNDLE_FILE, DICOM_DIR};
use brainns_docker::{ContainerSpec, VolumeBinding};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{check_exit, run_container, stage};
use crate::context::JobContext;
use crate::error::JobError;

const DICOM_INPUT: &str = "/app/input/dicom";
const NIFTI_INPUT: &str = "/app/input/nifti";
const NIFTI_OUTPUT: &str = "/app/output/nifti";

pub fn registered_file_name(kind: SequenceKind) -> String {
    format!("nifti_{}_register.nii.gz", kind.container_tag())
}

pub async fn run_preprocessing_job(
    ctx: &JobContext,
    input: PreprocessingJobInput,
) -> Result<(), JobError> {
    input.validate()?;
    let segmentation_id = input.segmentation_id;
    ctx.notifier
        .advance(segmentation_id, SegmentationStatus::Preprocessing);

    ctx.runtime
        .ensure_image(
            &ctx.settings.preprocessing_image,
            &ctx.settings.preprocessing_build_context,
        )
        .await?;
    tokio::fs::create_dir_all(&input.preprocessed_dir).await?;

    let name = ContainerName::new(ContainerPrefix::Preprocessing, segmentation_id);
    let container = name.to_string();
    let spec = ContainerSpec {
        image: ctx.settings.preprocessing_image.clone(),
        name,
        command: vec![
            "python".into(),
            "main.py".into(),
            "-p".into(),
            "nifti".into(),
            "-f".into(),
            input.file_format.as_str().into(),
        ],
        volumes: vec![VolumeBinding::read_write(
            ctx.layout.to_host(&input.preprocessed_dir),
            NIFTI_OUTPUT,
        )],
        device_requests: vec![],
        user: ctx.settings.container_user.clone(),
        auto_remove: true,
    };

    let sequences: Vec<(SequenceKind, SequenceRef)> = input
        .sequences
        .present()
        .map(|(kind, sequence)| (kind, sequence.clone()))
        .collect();
    clear_registered_outputs(&input.preprocessed_dir, &sequences).await?;
    let (staged, dest) = stage_raw_inputs(&input, sequences.clone()).await?;

    let log_path = input.preprocessed_dir.join(CONTAINER_LOG_FILE);
    let outcome = run_container(ctx, &spec, staged, dest, &log_path).await?;
    check_exit(outcome, &container, &log_path)?;

    for (kind, _) in &sequences {
        let registered = input.preprocessed_dir.join(registered_file_name(*kind));
        if !tokio::fs::try_exists(&registered).await? {
            return Err(JobError::ContainerExecution {
                container,
                reason: format!("no {} produced", registered_file_name(*kind)),
                log_path,
            });
        }
        tokio::fs::copy(&registered, input.preprocessed_dir.join(format!("{kind}.nii.gz")))
            .await?;
    }

    let dicom_dir = input.preprocessed_dir.join(DICOM_DIR);
    let mut channels = DisplayChannels::new();
    for (kind, _) in &sequences {
        let source = input.preprocessed_dir.join(format!("{kind}.nii.gz"));
        let range = ctx
            .converter
            .nifti_to_dicom(&source, &dicom_dir.join(kind.as_str()))
            .await?;
        channels.insert(*kind, range);
    }

    let recorded = ctx
        .store
        .record_display_values(input.display_values_id, &channels)
        .await?;
    if !recorded {
        tracing::debug!(
            segmentation_id,
            display_values_id = input.display_values_id,
            "Display values already recorded"
        );
    }

    let kinds: Vec<SequenceKind> = sequences.iter().map(|(kind, _)| *kind).collect();
    let bundle = dicom_dir.join(DICOM_BUNDLE_FILE);
    let entries = tokio::task::spawn_blocking(move || write_bundle(&dicom_dir, &kinds, &bundle))
        .await
        .map_err(io::Error::other)??;

    tracing::info!(
        segmentation_id,
        sequences = sequences.len(),
        bundle_entries = entries,
        "Preprocessing finished"
    );
    Ok(())
}

/// Drop registered volumes left by an earlier run so only this run's
/// output passes the check after the container exits.
async fn clear_registered_outputs(
    dir: &Path,
    sequences: &[(SequenceKind, SequenceRef)],
) -> Result<(), JobError> {
    for (kind, _) in sequences {
        match tokio::fs::remove_file(dir.join(registered_file_name(*kind))).await {
            Ok(()) => tracing::debug!(sequence = %kind, "Removed stale registered volume"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Raw uploads as the preprocessing container expects them.
async fn stage_raw_inputs(
    input: &PreprocessingJobInput,
    sequences: Vec<(SequenceKind, SequenceRef)>,
) -> Result<(bytes::Bytes, &'static str), JobError> {
    let raw_dir: PathBuf = input.raw_dir.clone();
    match input.file_format {
        FileFormat::Dicom => {
            let staged = stage(move |archive| {
                for (kind, sequence) in &sequences {
                    archive.add_dir(&raw_dir.join(sequence.dir_name()), kind.container_tag())?;
                }
                Ok(())
            })
            .await?;
            Ok((staged, DICOM_INPUT))
        }
        FileFormat::Nifti => {
            let staged = stage(move |archive| {
                for (kind, sequence) in &sequences {
                    let source = raw_dir
                        .join(sequence.dir_name())
                        .join(sequence.nifti_file_name());
                    archive.add_file(&source, &format!("nifti_{}.nii.gz", kind.container_tag()))?;
                }
                Ok(())
            })
            .await?;
            Ok((staged, NIFTI_INPUT))
        }
    }
}

/// Zip the files of every `dicom/{sequence}` directory into `bundle`,
/// each under `{sequence}/`. Returns the number of entries.
fn write_bundle(dicom_dir: &Path, kinds: &[SequenceKind], bundle: &Path) -> io::Result<usize> {
    let mut writer = ZipWriter::new(File::create(bundle)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0;

    for kind in kinds {
        let series = dicom_dir.join(kind.as_str());
        if !series.is_dir() {
            continue;
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&series)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        for path in files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            writer
                .start_file(format!("{kind}/{file_name}"), options)
                .map_err(io::Error::other)?;
            io::copy(&mut File::open(&path)?, &mut writer)?;
            entries += 1;
        }
    }

    writer.finish().map_err(io::Error::other)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_names_use_container_tags() {
        assert_eq!(
            registered_file_name(SequenceKind::T1km),
            "nifti_t1c_register.nii.gz"
        );
        assert_eq!(
            registered_file_name(SequenceKind::Flair),
            "nifti_flair_register.nii.gz"
        );
    }

    #[test]
    fn bundle_groups_files_by_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let dicom = dir.path().join("dicom");
        for (kind, files) in [("t1", 2), ("flair", 1)] {
            std::fs::create_dir_all(dicom.join(kind)).unwrap();
            for n in 0..files {
                std::fs::write(dicom.join(kind).join(format!("IM{n:04}.dcm")), b"dcm").unwrap();
            }
        }
        let bundle = dicom.join(DICOM_BUNDLE_FILE);

        let entries = write_bundle(
            &dicom,
            &[SequenceKind::T1, SequenceKind::Flair, SequenceKind::T2],
            &bundle,
        )
        .unwrap();
        assert_eq!(entries, 3);

        let mut archive = zip::ZipArchive::new(File::open(&bundle).unwrap()).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["flair/IM0000.dcm", "t1/IM0000.dcm", "t1/IM0001.dcm"]);
    }
}
