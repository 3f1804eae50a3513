//! Capturing container output to disk.

use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::RuntimeError;
use crate::runtime::LogStream;

/// Write every chunk of `stream` to `path`, truncating an existing file.
///
/// Returns the number of bytes written. A stream error stops the capture
/// and is returned after the file is flushed.
pub async fn drain_to_file(mut stream: LogStream, path: &Path) -> Result<u64, RuntimeError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    let mut failure = None;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                file.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    file.flush().await?;
    match failure {
        Some(e) => Err(e),
        None => Ok(written),
    }
}
