//! Tar archives used to stage inputs into containers.

use std::path::Path;

use bytes::Bytes;

use crate::error::RuntimeError;

/// In-memory tar archive built from files and directories on disk.
///
/// Every `add_*` call checks its source first and fails with
/// [`RuntimeError::MissingInput`] rather than producing a partial archive.
pub struct StagingArchive {
    builder: tar::Builder<Vec<u8>>,
    entries: Vec<String>,
}

impl Default for StagingArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingArchive {
    pub fn new() -> Self {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(true);
        Self {
            builder,
            entries: Vec::new(),
        }
    }

    /// Add `source` under `name` at the archive root.
    pub fn add_file(&mut self, source: &Path, name: &str) -> Result<(), RuntimeError> {
        if !source.is_file() {
            return Err(RuntimeError::MissingInput(source.to_path_buf()));
        }
        self.builder.append_path_with_name(source, name)?;
        self.entries.push(name.to_string());
        Ok(())
    }

    /// Add the contents of directory `source` under `name`.
    pub fn add_dir(&mut self, source: &Path, name: &str) -> Result<(), RuntimeError> {
        if !source.is_dir() {
            return Err(RuntimeError::MissingInput(source.to_path_buf()));
        }
        self.builder.append_dir_all(name, source)?;
        self.entries.push(format!("{name}/"));
        Ok(())
    }

    /// Top-level names added so far.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn finish(self) -> Result<Bytes, RuntimeError> {
        let data = self.builder.into_inner()?;
        Ok(Bytes::from(data))
    }

    /// Archive a whole directory with its contents at the root, as needed
    /// for an image build context.
    pub fn from_dir(source: &Path) -> Result<Bytes, RuntimeError> {
        let mut archive = Self::new();
        archive.add_dir(source, ".")?;
        archive.finish()
    }
}

/// Paths of every entry in a tar archive.
pub fn list_entries(archive: &[u8]) -> Result<Vec<String>, RuntimeError> {
    let mut reader = tar::Archive::new(archive);
    let mut paths = Vec::new();
    for entry in reader.entries()? {
        let entry = entry?;
        paths.push(entry.path()?.to_string_lossy().into_owned());
    }
    Ok(paths)
}
