//! Request DTO for starting a segmentation.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::sequence::SequenceIds;
use crate::types::DbId;

/// Body of `POST /api/v1/segmentations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SubmitSegmentation {
    #[validate(range(min = 1))]
    pub project_id: DbId,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1))]
    pub model: String,
    #[serde(flatten)]
    pub sequences: SequenceIds,
}

impl SubmitSegmentation {
    /// Run the derived validation and map failures to [`CoreError`].
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|errors| CoreError::Validation(errors.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn request(name: &str) -> SubmitSegmentation {
        SubmitSegmentation {
            project_id: 1,
            name: name.to_string(),
            model: "nnunet-brats".into(),
            sequences: SequenceIds::default(),
        }
    }

    #[test]
    fn accepts_reasonable_name() {
        request("Tumour baseline").check().unwrap();
    }

    #[test]
    fn rejects_empty_and_overlong_names() {
        assert_matches!(request("").check(), Err(CoreError::Validation(_)));
        assert_matches!(request(&"x".repeat(256)).check(), Err(CoreError::Validation(_)));
        request(&"x".repeat(255)).check().unwrap();
    }

    #[test]
    fn rejects_non_positive_project() {
        let mut req = request("ok");
        req.project_id = 0;
        assert_matches!(req.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn sequences_are_flattened_in_json() {
        let req: SubmitSegmentation = serde_json::from_str(
            r#"{"project_id": 2, "name": "a", "model": "m", "t1": 5, "flair": 6}"#,
        )
        .unwrap();
        assert_eq!(req.sequences.t1, Some(5));
        assert_eq!(req.sequences.flair, Some(6));
        assert_eq!(req.sequences.t2, None);
    }
}
