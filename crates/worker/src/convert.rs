//! NIfTI to DICOM conversion.
//!
//! The conversion itself happens in an external tool; this module only
//! runs it and reads back the intensity range of the converted volume.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use brainns_core::display::IntensityRange;
use tokio::process::Command;

use crate::error::JobError;

#[async_trait]
pub trait VolumeConverter: Send + Sync {
    /// Convert `source` to a DICOM series in `dest_dir` and return the
    /// volume's intensity range.
    async fn nifti_to_dicom(&self, source: &Path, dest_dir: &Path) -> Result<IntensityRange, JobError>;
}

/// Runs `{program} {args..} {source} {dest_dir}`.
///
/// The tool must print a JSON line `{"min": .., "max": ..}` on stdout; the
/// last such line wins.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line such as
    /// `python3 /opt/convert.py`.
    pub fn from_command_line(line: &str) -> Result<Self, JobError> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| JobError::Conversion("Converter command is empty".into()))?;
        Ok(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl VolumeConverter for CommandConverter {
    async fn nifti_to_dicom(&self, source: &Path, dest_dir: &Path) -> Result<IntensityRange, JobError> {
        if !tokio::fs::try_exists(source).await? {
            return Err(JobError::Conversion(format!(
                "Source volume {} does not exist",
                source.display()
            )));
        }
        tokio::fs::create_dir_all(dest_dir).await?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(source)
            .arg(dest_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::Conversion(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let range = parse_range(&stdout).ok_or_else(|| {
            JobError::Conversion(format!(
                "{} printed no intensity range for {}",
                self.program,
                source.display()
            ))
        })?;
        tracing::debug!(
            source = %source.display(),
            dest = %dest_dir.display(),
            min = range.min,
            max = range.max,
            "Volume converted"
        );
        Ok(range)
    }
}

fn parse_range(stdout: &str) -> Option<IntensityRange> {
    stdout
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str::<IntensityRange>(line.trim()).ok())
        .find(IntensityRange::is_valid)
}
