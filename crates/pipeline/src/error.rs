use brainns_core::error::CoreError;

use crate::queue::QueueError;
use crate::store::StoreError;

/// Errors returned by the coordinator and the reaper.
///
/// Domain errors from [`CoreError`] are folded into the matching variant so
/// callers only match on one level.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => PipelineError::Validation(msg),
            CoreError::NotFound { entity, id } => {
                PipelineError::NotFound(format!("{entity} with id {id}"))
            }
            CoreError::UnknownModel(model) => PipelineError::NotFound(format!("model {model}")),
            CoreError::Conflict(msg) => PipelineError::Conflict(msg),
            other => PipelineError::Core(other),
        }
    }
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        CoreError::NotFound { entity, id }.into()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn unknown_model_is_not_found() {
        let err: PipelineError = CoreError::UnknownModel("unet9000".into()).into();
        assert_matches!(err, PipelineError::NotFound(msg) if msg.contains("unet9000"));
    }

    #[test]
    fn internal_core_errors_stay_wrapped() {
        let err: PipelineError = CoreError::Internal("bad row".into()).into();
        assert_matches!(err, PipelineError::Core(CoreError::Internal(_)));
    }
}
