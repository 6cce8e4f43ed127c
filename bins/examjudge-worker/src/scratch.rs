/// Scratch area management
///
/// Every submission gets its own `examjudge-XXXXXX` directory under the
/// configured scratch root. The directory holds the source file and whatever
/// the compiler produces next to it (binaries, class files), so removing it
/// removes every artifact of the submission at once.
use examjudge_common::error::JudgeError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};

pub const SCRATCH_PREFIX: &str = "examjudge-";

/// Cleanup guard for one submission's scratch directory.
/// The directory is removed on drop, including on panic or cancellation.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ScratchDir {
    /// Children run with the scratch directory as their working directory,
    /// so the path handed out is always absolute.
    pub fn create(root: &Path) -> Result<Self, JudgeError> {
        fs::create_dir_all(root)?;
        let root = std::path::absolute(root)?;
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&root)?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "Created scratch directory");
        Ok(Self {
            path,
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a file into the scratch directory and return its path
    pub async fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf, JudgeError> {
        let file = self.path.join(name);
        tokio::fs::write(&file, contents).await?;
        Ok(file)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        // Cleanup failures are logged, never escalated
        match dir.close() {
            Ok(()) => debug!(path = %self.path.display(), "Removed scratch directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove scratch directory"
            ),
        }
    }
}

/// Remove scratch directories left behind by a crashed process.
///
/// Only entries carrying the scratch prefix and last modified more than
/// `max_age` ago are touched. Returns how many directories were removed.
pub fn sweep_orphans(root: &Path, max_age: Duration) -> io::Result<usize> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(
                path = %entry.path().display(),
                error = %e,
                "Failed to remove orphaned scratch directory"
            ),
        }
    }

    if removed > 0 {
        info!(removed, root = %root.display(), "Removed orphaned scratch directories");
    }
    Ok(removed)
}
