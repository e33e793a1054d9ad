//! The store of files sent along with every job.
//!
//! Uploaded files live flat in a single controller directory and are pushed to
//! the remote working directory of every run, next to the run's own inputs.

use std::io;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;

/// Represents the directory of uploaded files.
#[derive(Debug, Clone)]
pub struct UploadStore {
    /// The directory holding the uploaded files.
    dir: PathBuf,
}

impl UploadStore {
    /// Constructs a new upload store over the given directory.
    ///
    /// The directory is created on the first upload.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Gets the directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Adds a file to the store, replacing an upload with the same name.
    ///
    /// Returns the name the file is stored under.
    pub fn add(&self, path: &Path) -> Result<String> {
        if !path.is_file() {
            bail!("`{path}` is not a file", path = path.display());
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("`{path}` has no usable file name", path = path.display()))?
            .to_string();

        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!(
                "failed to create uploads directory `{dir}`",
                dir = self.dir.display()
            )
        })?;
        std::fs::copy(path, self.dir.join(&name)).with_context(|| {
            format!(
                "failed to copy `{path}` into the uploads directory",
                path = path.display()
            )
        })?;

        Ok(name)
    }

    /// Removes the upload with the given name.
    ///
    /// Returns `false` if there is no such upload.
    pub fn remove(&self, name: &str) -> Result<bool> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            bail!("`{name}` is not a valid upload name");
        }

        match std::fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to remove upload `{name}`")),
        }
    }

    /// Gets the names of the uploaded files, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "failed to read uploads directory `{dir}`",
                        dir = self.dir.display()
                    )
                });
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Gets the paths of the uploaded files, sorted by name.
    pub fn paths(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .names()?
            .into_iter()
            .map(|name| self.dir.join(name))
            .collect())
    }
}
