//! MRI sequence kinds and the four-slot sequence selection.
//!
//! A segmentation references up to four acquired volumes (t1, contrast
//! enhanced t1, t2, flair). [`SequenceSlots`] holds one optional value per
//! kind and is used both for raw ids coming from a client and for resolved
//! [`SequenceRef`]s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// Modality of an acquired MRI volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceKind {
    Flair,
    T1,
    T1km,
    T2,
}

impl SequenceKind {
    /// All kinds in canonical key order (`flair`, `t1`, `t1km`, `t2`).
    pub const ALL: [SequenceKind; 4] = [
        SequenceKind::Flair,
        SequenceKind::T1,
        SequenceKind::T1km,
        SequenceKind::T2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SequenceKind::Flair => "flair",
            SequenceKind::T1 => "t1",
            SequenceKind::T1km => "t1km",
            SequenceKind::T2 => "t2",
        }
    }

    /// Name used by the preprocessing image for directories and files.
    ///
    /// The image calls the contrast enhanced t1 `t1c`.
    pub fn container_tag(self) -> &'static str {
        match self {
            SequenceKind::T1km => "t1c",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SequenceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown sequence kind: {s}")))
    }
}

/// A resolved reference to an uploaded sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRef {
    pub id: DbId,
    pub name: String,
}

impl SequenceRef {
    /// Directory name of the raw upload: `{id}-{name}`.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.id, self.name)
    }

    /// File name of the raw NIfTI volume inside [`dir_name`](Self::dir_name).
    pub fn nifti_file_name(&self) -> String {
        format!("{}.nii.gz", self.id)
    }
}

/// One optional value per [`SequenceKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct SequenceSlots<T> {
    #[serde(default)]
    pub t1: Option<T>,
    #[serde(default)]
    pub t1km: Option<T>,
    #[serde(default)]
    pub t2: Option<T>,
    #[serde(default)]
    pub flair: Option<T>,
}

/// Sequence ids as submitted by a client.
pub type SequenceIds = SequenceSlots<DbId>;

/// Sequences resolved against the `sequences` table.
pub type SequenceSelection = SequenceSlots<SequenceRef>;

impl<T> Default for SequenceSlots<T> {
    fn default() -> Self {
        Self {
            t1: None,
            t1km: None,
            t2: None,
            flair: None,
        }
    }
}

impl<T> SequenceSlots<T> {
    pub fn get(&self, kind: SequenceKind) -> Option<&T> {
        match kind {
            SequenceKind::Flair => self.flair.as_ref(),
            SequenceKind::T1 => self.t1.as_ref(),
            SequenceKind::T1km => self.t1km.as_ref(),
            SequenceKind::T2 => self.t2.as_ref(),
        }
    }

    pub fn set(&mut self, kind: SequenceKind, value: T) {
        let slot = match kind {
            SequenceKind::Flair => &mut self.flair,
            SequenceKind::T1 => &mut self.t1,
            SequenceKind::T1km => &mut self.t1km,
            SequenceKind::T2 => &mut self.t2,
        };
        *slot = Some(value);
    }

    /// Populated slots in canonical order.
    pub fn present(&self) -> impl Iterator<Item = (SequenceKind, &T)> + '_ {
        SequenceKind::ALL
            .into_iter()
            .filter_map(move |kind| self.get(kind).map(|value| (kind, value)))
    }

    /// Kinds from `required` that have no value.
    pub fn missing(&self, required: &[SequenceKind]) -> Vec<SequenceKind> {
        required
            .iter()
            .copied()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

impl<T: Clone> SequenceSlots<T> {
    /// Copy of the selection containing only the `required` kinds.
    pub fn restricted_to(&self, required: &[SequenceKind]) -> Self {
        let mut restricted = Self::default();
        for kind in required {
            if let Some(value) = self.get(*kind) {
                restricted.set(*kind, value.clone());
            }
        }
        restricted
    }
}

impl SequenceSelection {
    /// Deterministic key of the sequence combination.
    ///
    /// Format `{flair}_{t1}_{t1km}_{t2}` with `0` for an absent slot. Two
    /// selections with the same key share their preprocessed data.
    pub fn combination_key(&self) -> String {
        SequenceKind::ALL
            .into_iter()
            .map(|kind| self.get(kind).map_or(0, |seq| seq.id).to_string())
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn ids(&self) -> SequenceIds {
        let mut ids = SequenceIds::default();
        for (kind, seq) in self.present() {
            ids.set(kind, seq.id);
        }
        ids
    }
}
