use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Scratch files owned by one request. Names are unique per allocation, so
/// concurrent requests never share a path.
pub struct ScratchFiles {
    dir: PathBuf,
    paths: Vec<TempPath>,
}

impl ScratchFiles {
    pub fn new(dir: Option<&Path>) -> Self {
        Self {
            dir: dir.map(Path::to_path_buf).unwrap_or_else(env::temp_dir),
            paths: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn allocate(&mut self, prefix: &str, suffix: &str) -> Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.dir)
            .map_err(|err| {
                PipelineError::io(
                    format!("failed to create scratch file in {}", self.dir.display()),
                    err,
                )
            })?;
        let path = file.into_temp_path();
        let owned = path.to_path_buf();
        self.paths.push(path);
        Ok(owned)
    }

    /// Best-effort removal. Failures are logged and counted, never returned.
    pub fn cleanup(self) -> usize {
        let mut failures = 0;
        for path in self.paths {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => debug!(path = %shown, "removed scratch file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    failures += 1;
                    warn!(path = %shown, %err, "could not remove scratch file");
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn allocations_are_unique_and_removed_on_cleanup() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut scratch = ScratchFiles::new(Some(temp.path()));

        let first = scratch.allocate("medlens-upload-", ".png")?;
        let second = scratch.allocate("medlens-upload-", ".png")?;
        assert_ne!(first, second);
        assert!(first.starts_with(temp.path()));
        let name = first.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("medlens-upload-") && name.ends_with(".png"), "{name}");
        assert!(first.exists() && second.exists());

        assert_eq!(scratch.cleanup(), 0);
        assert!(!first.exists());
        assert!(!second.exists());
        Ok(())
    }

    #[test]
    fn cleanup_tolerates_files_already_gone() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut scratch = ScratchFiles::new(Some(temp.path()));
        let path = scratch.allocate("medlens-", ".bin")?;
        fs::remove_file(&path)?;

        assert_eq!(scratch.cleanup(), 0);
        Ok(())
    }

    #[test]
    fn dropping_without_cleanup_still_removes_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = {
            let mut scratch = ScratchFiles::new(Some(temp.path()));
            scratch.allocate("medlens-", ".bin")?
        };
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn defaults_to_os_temp_dir() {
        assert_eq!(ScratchFiles::new(None).dir(), env::temp_dir().as_path());
    }
}
