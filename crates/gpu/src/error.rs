#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No GPU became available after {attempts} attempts")]
    ResourceUnavailable { attempts: u32 },

    #[error("GPU probe failed: {0}")]
    Probe(String),
}

impl From<nvml_wrapper::error::NvmlError> for GpuError {
    fn from(err: nvml_wrapper::error::NvmlError) -> Self {
        GpuError::Probe(err.to_string())
    }
}
