//! Per-channel intensity bounds shown by the viewer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sequence::SequenceKind;

/// Minimum and maximum voxel intensity of one volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityRange {
    pub min: f64,
    pub max: f64,
}

impl IntensityRange {
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Intensity bounds keyed by sequence, stored as JSON.
pub type DisplayChannels = BTreeMap<SequenceKind, IntensityRange>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_serialize_with_sequence_keys() {
        let mut channels = DisplayChannels::new();
        channels.insert(SequenceKind::T1km, IntensityRange { min: 0.0, max: 10.5 });
        let json = serde_json::to_value(&channels).unwrap();
        assert_eq!(json["t1km"]["max"], 10.5);
    }

    #[test]
    fn inverted_range_is_invalid() {
        assert!(!IntensityRange { min: 2.0, max: 1.0 }.is_valid());
        assert!(!IntensityRange { min: f64::NAN, max: 1.0 }.is_valid());
        assert!(IntensityRange { min: 1.0, max: 1.0 }.is_valid());
    }
}
