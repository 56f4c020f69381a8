//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::FleetError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Output layout for a fleet run
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all output
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// JSON manifest for a run
    pub fn manifest_json_file(&self, run_timestamp: i64) -> File {
        File::new(self.base_dir.join(format!("manifest-{}.json", run_timestamp)))
    }

    /// Key/value manifest with teardown commands for a run
    pub fn manifest_env_file(&self, run_timestamp: i64) -> File {
        File::new(self.base_dir.join(format!("manifest-{}.env", run_timestamp)))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Scratch space for metadata files and the askpass helper
    pub fn work_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("work"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), FleetError> {
        Dir::new(&self.base_dir).create().await?;
        self.logs_dir().create().await?;
        self.work_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("deployments")
    }
}
