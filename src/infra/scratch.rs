//! Temporary mountpoints and scratch files
//!
//! Both are created atomically under the configured directories; only
//! mountpoints handed out here are ever removed again.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::config::Settings;
use crate::error::MountError;

/// Allocator for temporary mountpoints and scratch files
#[derive(Debug)]
pub struct ScratchSpace {
    mount_dir: PathBuf,
    download_dir: PathBuf,
    allocated: HashSet<PathBuf>,
}

fn scratch_error(path: &Path) -> impl FnOnce(io::Error) -> MountError + '_ {
    move |e| MountError::Mountpoint {
        path: path.to_path_buf(),
        error: e.to_string(),
    }
}

impl ScratchSpace {
    pub fn new(mount_dir: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            mount_dir: mount_dir.into(),
            download_dir: download_dir.into(),
            allocated: HashSet::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.mount_dir(), settings.download_dir())
    }

    /// Create a fresh empty directory to mount on
    pub fn new_mountpoint(&mut self) -> Result<PathBuf, MountError> {
        fs::create_dir_all(&self.mount_dir).map_err(scratch_error(&self.mount_dir))?;

        let path = Builder::new()
            .prefix("mp")
            .tempdir_in(&self.mount_dir)
            .map_err(scratch_error(&self.mount_dir))?
            .keep();
        tracing::debug!(path = %path.display(), "mountpoint created");
        self.allocated.insert(path.clone());
        Ok(path)
    }

    /// Remove a mountpoint created by [`Self::new_mountpoint`]
    ///
    /// Other paths are left alone.
    pub fn release_mountpoint(&mut self, path: &Path) {
        if self.allocated.remove(path) {
            if let Err(e) = fs::remove_dir(path) {
                tracing::debug!(path = %path.display(), "mountpoint not removed: {e}");
            }
        }
    }

    /// Create a new empty scratch file owned by the caller
    pub fn new_download(&mut self) -> Result<PathBuf, MountError> {
        fs::create_dir_all(&self.download_dir).map_err(scratch_error(&self.download_dir))?;

        let path = Builder::new()
            .prefix("image")
            .tempfile_in(&self.download_dir)
            .map_err(scratch_error(&self.download_dir))?
            .into_temp_path()
            .keep()
            .map_err(|e| scratch_error(&self.download_dir)(e.error))?;
        tracing::debug!(path = %path.display(), "scratch file created");
        Ok(path)
    }

    /// Delete a scratch file, ignoring a missing one
    pub fn remove_download(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "scratch file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "scratch file not removed: {e}"),
        }
    }

    pub fn mount_dir(&self) -> &Path {
        &self.mount_dir
    }
}
