//! Data-driven registry of segmentation models.
//!
//! Loaded once at startup from a JSON document:
//!
//! ```json
//! { "models": [ { "id": "nnunet-brats", "image": "nnunet:brainns", ... } ] }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::naming::{ContainerName, ContainerPrefix};
use crate::sequence::SequenceKind;
use crate::types::DbId;

/// Placeholder in `command` replaced with the segmentation id.
pub const SEGMENTATION_ID_PLACEHOLDER: &str = "{segmentation_id}";

/// Configuration of one segmentation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    /// Image tag; built from `dockerfile_path` when absent.
    pub image: String,
    pub dockerfile_path: PathBuf,
    /// Input sequences in the order the model reads them.
    pub necessary_sequences: Vec<SequenceKind>,
    #[serde(default)]
    pub uses_gpu: bool,
    /// Feed raw NIfTI uploads straight to the model.
    #[serde(default)]
    pub skip_preprocessing: bool,
    #[serde(default)]
    pub command: Vec<String>,
    /// Directory inside the container the model writes its result to.
    pub output_path: String,
    #[serde(default)]
    pub container_prefix: ContainerPrefix,
    /// Convert the label volume to a DICOM series after prediction.
    #[serde(default)]
    pub export_dicom: bool,
}

impl ModelConfig {
    /// Command with every placeholder substituted.
    pub fn render_command(&self, segmentation_id: DbId) -> Vec<String> {
        let id = segmentation_id.to_string();
        self.command
            .iter()
            .map(|arg| arg.replace(SEGMENTATION_ID_PLACEHOLDER, &id))
            .collect()
    }

    pub fn container_name(&self, segmentation_id: DbId) -> ContainerName {
        ContainerName::new(self.container_prefix, segmentation_id)
    }

    /// Reject configurations a worker could not run.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Validation("Model id must not be empty".into()));
        }
        if self.image.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Model {} has no image tag",
                self.id
            )));
        }
        if self.necessary_sequences.is_empty() {
            return Err(CoreError::Validation(format!(
                "Model {} declares no necessary sequences",
                self.id
            )));
        }
        let mut seen = Vec::with_capacity(self.necessary_sequences.len());
        for kind in &self.necessary_sequences {
            if seen.contains(kind) {
                return Err(CoreError::Validation(format!(
                    "Model {} lists sequence {kind} twice",
                    self.id
                )));
            }
            seen.push(*kind);
        }
        if !self.output_path.starts_with('/') {
            return Err(CoreError::Validation(format!(
                "Model {} output_path must be absolute",
                self.id
            )));
        }
        if self.container_prefix == ContainerPrefix::Preprocessing {
            return Err(CoreError::Validation(format!(
                "Model {} may not use the preprocessing container prefix",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    models: Vec<ModelConfig>,
}

/// Lookup of [`ModelConfig`]s by id.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
}

impl ModelRegistry {
    pub fn from_configs(configs: impl IntoIterator<Item = ModelConfig>) -> Result<Self, CoreError> {
        let mut models = HashMap::new();
        for config in configs {
            config.validate()?;
            if models.contains_key(&config.id) {
                return Err(CoreError::Validation(format!(
                    "Duplicate model id: {}",
                    config.id
                )));
            }
            models.insert(config.id.clone(), config);
        }
        Ok(Self { models })
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let file: RegistryFile = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid model registry: {e}")))?;
        Self::from_configs(file.models)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Internal(format!(
                "Failed to read model registry {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, model_id: &str) -> Result<&ModelConfig, CoreError> {
        self.models
            .get(model_id)
            .ok_or_else(|| CoreError::UnknownModel(model_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}
