//! Workload deployment on ready instances

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::deploy::docker::DockerCommands;
use crate::deploy::health::{health_url, HealthChecker};
use crate::errors::FleetError;
use crate::models::instance::InstanceHandle;
use crate::models::manifest::WorkloadResult;
use crate::models::spec::{WorkloadRef, WorkloadStrategy};
use crate::remote::RemoteExecutor;
use crate::utils::shell_quote;

/// Where uploaded sources land, relative to the remote home directory
pub const REMOTE_SOURCE_DIR: &str = "workload";

/// Removes sources left by an earlier deployment so the upload recreates
/// the directory instead of nesting into it
pub fn clear_source_dir_command() -> String {
    format!("rm -rf \"$HOME/{}\"", REMOTE_SOURCE_DIR)
}

/// Timeout for the artifact listing
const STATS_TIMEOUT: Duration = Duration::from_secs(60);

/// Prints the file count then the total byte size of `dir`, `0` for both
/// when it does not exist
pub fn artifact_stats_command(dir: &str) -> String {
    let dir = shell_quote(dir);
    format!(
        "if sudo test -d {dir}; then sudo find {dir} -type f | wc -l; \
         sudo du -sb {dir} | cut -f1; else echo 0; echo 0; fi"
    )
}

/// Parse the output of [`artifact_stats_command`]
pub fn parse_artifact_stats(stdout: &str) -> Result<(u64, u64), FleetError> {
    let mut values = stdout.split_whitespace().map(str::parse::<u64>);
    match (values.next(), values.next()) {
        (Some(Ok(count)), Some(Ok(bytes))) => Ok((count, bytes)),
        _ => Err(FleetError::DeployError(format!(
            "unexpected artifact stats output: {:?}",
            stdout.trim()
        ))),
    }
}

/// Deploys the workload container and reports on its output
pub struct WorkloadDeployer {
    remote: Arc<dyn RemoteExecutor>,
    health: Option<HealthChecker>,
    command_timeout: Duration,
}

impl WorkloadDeployer {
    pub fn new(
        remote: Arc<dyn RemoteExecutor>,
        health: Option<HealthChecker>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            health,
            command_timeout,
        }
    }

    /// Deploy on one instance. Failures are reported in the result.
    pub async fn deploy(&self, handle: &InstanceHandle, workload: &WorkloadRef) -> WorkloadResult {
        let Some(strategy) = workload.strategy() else {
            return WorkloadResult::failed("no workload image or source directory configured");
        };
        let strategy_name = match &strategy {
            WorkloadStrategy::Image { .. } => "image",
            WorkloadStrategy::Source { .. } => "source",
        };

        info!("[{}] deploying workload ({})", handle.name, strategy_name);
        let mut result = match self.run_strategy(handle, workload, &strategy).await {
            Ok(()) => match self.artifact_stats(handle, &workload.output_dir).await {
                Ok((count, bytes)) => WorkloadResult::succeeded(count, bytes),
                Err(e) => {
                    warn!("[{}] could not read artifact stats: {}", handle.name, e);
                    WorkloadResult::succeeded(0, 0)
                }
            },
            Err(e) => {
                error!("[{}] workload deployment failed: {}", handle.name, e);
                WorkloadResult::failed(e.to_string())
            }
        }
        .with_strategy(strategy_name);

        if result.success {
            result.healthy = self.probe_health(handle, workload).await;
        }
        result
    }

    async fn run_strategy(
        &self,
        handle: &InstanceHandle,
        workload: &WorkloadRef,
        strategy: &WorkloadStrategy,
    ) -> Result<(), FleetError> {
        let docker = DockerCommands::new(workload);
        let command = match strategy {
            WorkloadStrategy::Image { reference } => docker.pull_and_run(reference),
            WorkloadStrategy::Source { local_dir } => {
                let cleared = self
                    .remote
                    .execute(handle, &clear_source_dir_command(), self.command_timeout)
                    .await?;
                if !cleared.success() {
                    return Err(FleetError::DeployError(format!(
                        "could not clear previous sources: {}",
                        cleared.error_message()
                    )));
                }
                self.remote
                    .upload(handle, local_dir, REMOTE_SOURCE_DIR, self.command_timeout)
                    .await?;
                docker.build_and_run(&format!("\"$HOME/{}\"", REMOTE_SOURCE_DIR))
            }
        };

        let output = self
            .remote
            .execute(handle, &command, self.command_timeout)
            .await?;
        if !output.success() {
            return Err(FleetError::DeployError(output.error_message()));
        }
        Ok(())
    }

    async fn artifact_stats(
        &self,
        handle: &InstanceHandle,
        output_dir: &str,
    ) -> Result<(u64, u64), FleetError> {
        let output = self
            .remote
            .execute(handle, &artifact_stats_command(output_dir), STATS_TIMEOUT)
            .await?;
        if !output.success() {
            return Err(FleetError::RemoteError(output.error_message()));
        }
        parse_artifact_stats(&output.stdout)
    }

    async fn probe_health(&self, handle: &InstanceHandle, workload: &WorkloadRef) -> Option<bool> {
        let checker = self.health.as_ref()?;
        let ip = handle.external_ip.as_deref()?;
        let path = workload.health_path.as_deref()?;

        let url = health_url(ip, workload.service_port, path);
        let healthy = checker.check(&url).await;
        if healthy {
            info!("[{}] {} is healthy", handle.name, url);
        } else {
            warn!("[{}] {} did not become healthy", handle.name, url);
        }
        Some(healthy)
    }
}
