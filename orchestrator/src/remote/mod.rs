//! Remote command execution on fleet instances

pub mod auth;
pub mod ssh;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::cloud::gcloud::CommandOutput;
use crate::errors::FleetError;
use crate::models::instance::InstanceHandle;

/// Runs commands on, and copies files to, an instance
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on the instance.
    ///
    /// A command that ran and failed is `Ok` with a non-zero exit code. An
    /// unreachable channel or a timeout is `Err`.
    async fn execute(
        &self,
        instance: &InstanceHandle,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, FleetError>;

    /// Copy a local directory to `remote_path` on the instance
    async fn upload(
        &self,
        instance: &InstanceHandle,
        local_dir: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), FleetError>;
}
