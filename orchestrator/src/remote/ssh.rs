//! Remote execution through `gcloud compute ssh`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::cloud::gcloud::{CommandOutput, Gcloud, Invocation};
use crate::errors::FleetError;
use crate::filesys::dir::Dir;
use crate::models::instance::InstanceHandle;
use crate::remote::auth::Authenticator;
use crate::remote::RemoteExecutor;

/// Environment variable the askpass helper reads the passphrase from
pub const PASSPHRASE_ENV: &str = "FLEET_SSH_PASSPHRASE";

const ASKPASS_SCRIPT: &str = "#!/bin/sh\nprintf '%s\\n' \"$FLEET_SSH_PASSPHRASE\"\n";

/// ssh reserves this exit code for its own connection failures
const SSH_CONNECTION_FAILURE: i32 = 255;

/// stderr lines ssh prints when it never reached the remote shell
const CHANNEL_FAILURE_MARKERS: &[&str] = &[
    "ssh: connect to host",
    "ssh: Could not resolve hostname",
    "Connection refused",
    "Connection timed out",
    "Connection closed by",
    "Connection reset by",
    "kex_exchange_identification",
    "Permission denied (publickey",
    "Host key verification failed",
];

/// Whether a 255 exit came from ssh itself rather than the remote command.
///
/// A remote command exiting 255 has no ssh diagnostics on stderr.
pub fn is_channel_failure(output: &CommandOutput) -> bool {
    output.exit_code == Some(SSH_CONNECTION_FAILURE)
        && CHANNEL_FAILURE_MARKERS
            .iter()
            .any(|marker| output.stderr.contains(marker))
}

/// `RemoteExecutor` over `gcloud compute ssh` / `scp`
pub struct GcloudSsh {
    gcloud: Gcloud,
    authenticator: Arc<dyn Authenticator>,
    askpass: Option<PathBuf>,
}

impl GcloudSsh {
    /// Writes the askpass helper into `work_dir` when a passphrase is configured
    pub async fn new(
        gcloud: Gcloud,
        authenticator: Arc<dyn Authenticator>,
        work_dir: &Dir,
    ) -> Result<Self, FleetError> {
        let askpass = if authenticator.passphrase().is_some() {
            let file = work_dir.file("askpass.sh");
            file.write_private(ASKPASS_SCRIPT).await?;
            file.set_mode(0o700).await?;
            Some(file.path().to_path_buf())
        } else {
            None
        };

        Ok(Self {
            gcloud,
            authenticator,
            askpass,
        })
    }

    fn auth_envs(&self) -> Vec<(String, String)> {
        match (self.authenticator.passphrase(), &self.askpass) {
            (Some(passphrase), Some(askpass)) => vec![
                ("SSH_ASKPASS".to_string(), askpass.display().to_string()),
                ("SSH_ASKPASS_REQUIRE".to_string(), "force".to_string()),
                ("DISPLAY".to_string(), ":0".to_string()),
                (PASSPHRASE_ENV.to_string(), passphrase.expose_secret().to_string()),
            ],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for GcloudSsh {
    async fn execute(
        &self,
        instance: &InstanceHandle,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, FleetError> {
        debug!("[{}] $ {}", instance.name, command);
        let args = [
            "compute".to_string(),
            "ssh".to_string(),
            instance.name.clone(),
            format!("--zone={}", instance.zone),
            "--strict-host-key-checking=no".to_string(),
            format!("--command={}", command),
        ];
        let output = self
            .gcloud
            .run_with(
                &args,
                Invocation {
                    envs: self.auth_envs(),
                    timeout: Some(timeout),
                    ..Default::default()
                },
            )
            .await?;

        if is_channel_failure(&output) {
            return Err(FleetError::RemoteError(format!(
                "ssh to {} failed: {}",
                instance.name,
                output.error_message()
            )));
        }
        Ok(output)
    }

    async fn upload(
        &self,
        instance: &InstanceHandle,
        local_dir: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), FleetError> {
        debug!("[{}] uploading {} to {}", instance.name, local_dir.display(), remote_path);
        let args = [
            "compute".to_string(),
            "scp".to_string(),
            "--recurse".to_string(),
            format!("--zone={}", instance.zone),
            "--strict-host-key-checking=no".to_string(),
            local_dir.display().to_string(),
            format!("{}:{}", instance.name, remote_path),
        ];
        let output = self
            .gcloud
            .run_with(
                &args,
                Invocation {
                    envs: self.auth_envs(),
                    timeout: Some(timeout),
                    ..Default::default()
                },
            )
            .await?;

        if !output.success() {
            return Err(FleetError::RemoteError(format!(
                "upload to {} failed: {}",
                instance.name,
                output.error_message()
            )));
        }
        Ok(())
    }
}
