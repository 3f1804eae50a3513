//! Job payloads carried through the queue as JSON.
//!
//! Every payload is validated before it is enqueued so a worker never picks
//! up a job it cannot run for structural reasons.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sequence::{SequenceKind, SequenceSelection};
use crate::types::DbId;

/// Kind of queued job. Selects the payload type and the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Preprocess,
    Predict,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Preprocess => "preprocess",
            JobKind::Predict => "predict",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preprocess" => Ok(JobKind::Preprocess),
            "predict" => Ok(JobKind::Predict),
            other => Err(CoreError::Validation(format!("Unknown job kind: {other}"))),
        }
    }
}

/// Status action executed when a job reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCallback {
    MarkDone,
    MarkError,
}

impl JobCallback {
    pub fn as_str(self) -> &'static str {
        match self {
            JobCallback::MarkDone => "mark_done",
            JobCallback::MarkError => "mark_error",
        }
    }
}

impl FromStr for JobCallback {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mark_done" => Ok(JobCallback::MarkDone),
            "mark_error" => Ok(JobCallback::MarkError),
            other => Err(CoreError::Validation(format!("Unknown job callback: {other}"))),
        }
    }
}

/// Format of the raw uploads of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Dicom,
    Nifti,
}

impl FileFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            FileFormat::Dicom => "dicom",
            FileFormat::Nifti => "nifti",
        }
    }
}

impl FromStr for FileFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dicom" => Ok(FileFormat::Dicom),
            "nifti" => Ok(FileFormat::Nifti),
            other => Err(CoreError::Validation(format!("Unknown file format: {other}"))),
        }
    }
}

/// Input of a preprocessing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingJobInput {
    pub segmentation_id: DbId,
    pub display_values_id: DbId,
    pub file_format: FileFormat,
    pub sequences: SequenceSelection,
    /// Directory holding `{sequence_id}-{name}` upload folders.
    pub raw_dir: PathBuf,
    pub preprocessed_dir: PathBuf,
}

impl PreprocessingJobInput {
    pub fn validate(&self) -> Result<(), CoreError> {
        ensure_positive("segmentation_id", self.segmentation_id)?;
        ensure_positive("display_values_id", self.display_values_id)?;
        ensure_absolute("raw_dir", &self.raw_dir)?;
        ensure_absolute("preprocessed_dir", &self.preprocessed_dir)?;
        if self.sequences.is_empty() {
            return Err(CoreError::Validation(
                "Preprocessing requires at least one sequence".into(),
            ));
        }
        for (kind, seq) in self.sequences.present() {
            if seq.id <= 0 {
                return Err(CoreError::Validation(format!(
                    "Sequence {kind} has non-positive id {}",
                    seq.id
                )));
            }
        }
        Ok(())
    }
}

/// Input of a prediction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionJobInput {
    pub segmentation_id: DbId,
    pub model_id: String,
    /// Sequences in the order the model expects them.
    pub sequences: Vec<SequenceKind>,
    pub preprocessed_dir: PathBuf,
    pub result_dir: PathBuf,
}

impl PredictionJobInput {
    pub fn validate(&self) -> Result<(), CoreError> {
        ensure_positive("segmentation_id", self.segmentation_id)?;
        ensure_absolute("preprocessed_dir", &self.preprocessed_dir)?;
        ensure_absolute("result_dir", &self.result_dir)?;
        if self.model_id.trim().is_empty() {
            return Err(CoreError::Validation("model_id must not be empty".into()));
        }
        if self.sequences.is_empty() {
            return Err(CoreError::Validation(
                "Prediction requires at least one sequence".into(),
            ));
        }
        Ok(())
    }
}

fn ensure_positive(field: &str, value: DbId) -> Result<(), CoreError> {
    if value > 0 {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "{field} must be positive, got {value}"
        )))
    }
}

fn ensure_absolute(field: &str, path: &std::path::Path) -> Result<(), CoreError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "{field} must be an absolute path, got {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::sequence::SequenceRef;

    fn preprocessing_input() -> PreprocessingJobInput {
        let mut sequences = SequenceSelection::default();
        sequences.set(
            SequenceKind::T1,
            SequenceRef {
                id: 4,
                name: "t1".into(),
            },
        );
        PreprocessingJobInput {
            segmentation_id: 1,
            display_values_id: 2,
            file_format: FileFormat::Nifti,
            sequences,
            raw_dir: "/data/projects/1/raw".into(),
            preprocessed_dir: "/data/projects/1/preprocessed/0_4_0_0".into(),
        }
    }

    fn prediction_input() -> PredictionJobInput {
        PredictionJobInput {
            segmentation_id: 1,
            model_id: "nnunet-brats".into(),
            sequences: vec![SequenceKind::T1],
            preprocessed_dir: "/data/p".into(),
            result_dir: "/data/r".into(),
        }
    }

    #[test]
    fn valid_inputs_pass() {
        preprocessing_input().validate().unwrap();
        prediction_input().validate().unwrap();
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut input = prediction_input();
        input.result_dir = "relative/out".into();
        assert_matches!(input.validate(), Err(CoreError::Validation(msg)) if msg.contains("result_dir"));
    }

    #[test]
    fn empty_selection_is_rejected() {
        let mut input = preprocessing_input();
        input.sequences = SequenceSelection::default();
        assert_matches!(input.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn non_positive_ids_are_rejected() {
        let mut input = prediction_input();
        input.segmentation_id = 0;
        assert_matches!(input.validate(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn payload_survives_json() {
        let input = preprocessing_input();
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["file_format"], "nifti");
        let back: PreprocessingJobInput = serde_json::from_value(value).unwrap();
        assert_eq!(back, input);
    }

    #[test]
    fn kinds_and_callbacks_parse() {
        assert_eq!("predict".parse::<JobKind>().unwrap(), JobKind::Predict);
        assert_eq!(
            "mark_error".parse::<JobCallback>().unwrap(),
            JobCallback::MarkError
        );
        assert!("mark_maybe".parse::<JobCallback>().is_err());
    }
}
