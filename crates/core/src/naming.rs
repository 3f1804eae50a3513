//! Deterministic container names.
//!
//! Containers are never indexed in the database. A container belonging to a
//! segmentation is found by parsing its name: `{prefix}{segmentation_id}`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::DbId;

/// Known container name prefixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerPrefix {
    Preprocessing,
    NnUnet,
    DeepMedic,
    SynthSeg,
    #[default]
    Model,
}

impl ContainerPrefix {
    pub const ALL: [ContainerPrefix; 5] = [
        ContainerPrefix::Preprocessing,
        ContainerPrefix::NnUnet,
        ContainerPrefix::DeepMedic,
        ContainerPrefix::SynthSeg,
        ContainerPrefix::Model,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerPrefix::Preprocessing => "preprocessing_container_",
            ContainerPrefix::NnUnet => "nnUnet_container_",
            ContainerPrefix::DeepMedic => "deepmedic_container_",
            ContainerPrefix::SynthSeg => "synthseg_container_",
            ContainerPrefix::Model => "model_container_",
        }
    }
}

/// Name of a container owned by one segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerName {
    pub prefix: ContainerPrefix,
    pub segmentation_id: DbId,
}

impl ContainerName {
    pub fn new(prefix: ContainerPrefix, segmentation_id: DbId) -> Self {
        Self {
            prefix,
            segmentation_id,
        }
    }

    /// Parse an engine container name.
    ///
    /// The engine reports names with a leading `/`, which is stripped. The
    /// suffix must be the full positive decimal id, so `nnUnet_container_11`
    /// never parses as segmentation `1`.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.strip_prefix('/').unwrap_or(raw);
        ContainerPrefix::ALL.into_iter().find_map(|prefix| {
            let suffix = name.strip_prefix(prefix.as_str())?;
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let segmentation_id: DbId = suffix.parse().ok()?;
            (segmentation_id > 0 && segmentation_id.to_string() == suffix)
                .then_some(ContainerName::new(prefix, segmentation_id))
        })
    }

    /// Whether `raw` names a container of `segmentation_id` under one of
    /// `prefixes`.
    pub fn matches(raw: &str, prefixes: &[ContainerPrefix], segmentation_id: DbId) -> bool {
        Self::parse(raw).is_some_and(|name| {
            name.segmentation_id == segmentation_id && prefixes.contains(&name.prefix)
        })
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix.as_str(), self.segmentation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_concatenates_prefix_and_id() {
        let name = ContainerName::new(ContainerPrefix::NnUnet, 42);
        assert_eq!(name.to_string(), "nnUnet_container_42");
    }

    #[test]
    fn parse_strips_engine_slash() {
        let name = ContainerName::parse("/preprocessing_container_7").unwrap();
        assert_eq!(name, ContainerName::new(ContainerPrefix::Preprocessing, 7));
    }

    #[test]
    fn id_suffix_must_match_exactly() {
        assert!(!ContainerName::matches("nnUnet_container_11", &ContainerPrefix::ALL, 1));
        assert!(ContainerName::matches("nnUnet_container_11", &ContainerPrefix::ALL, 11));
        assert!(!ContainerName::matches("nnUnet_container_011", &ContainerPrefix::ALL, 11));
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert_eq!(ContainerName::parse("postgres"), None);
        assert_eq!(ContainerName::parse("nnUnet_container_"), None);
        assert_eq!(ContainerName::parse("nnUnet_container_-3"), None);
        assert_eq!(ContainerName::parse("nnUnet_container_0"), None);
        assert_eq!(ContainerName::parse("other_nnUnet_container_3"), None);
    }

    #[test]
    fn matches_respects_prefix_filter() {
        assert!(!ContainerName::matches(
            "deepmedic_container_5",
            &[ContainerPrefix::Preprocessing],
            5
        ));
    }
}
