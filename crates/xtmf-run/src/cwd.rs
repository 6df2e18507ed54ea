//! Process working-directory guard

use std::path::{Path, PathBuf};
use tracing::warn;

/// Changes the process working directory and restores the previous one on drop.
pub struct WorkingDirectory {
    previous: PathBuf,
}

impl WorkingDirectory {
    pub fn enter(directory: &Path) -> std::io::Result<Self> {
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(directory)?;
        Ok(Self { previous })
    }
}

impl Drop for WorkingDirectory {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            warn!("failed to restore working directory {}: {}", self.previous.display(), e);
        }
    }
}
