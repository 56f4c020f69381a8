//! `gcloud` command runner

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::FleetError;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The most useful line of stderr for an error message
    pub fn error_message(&self) -> String {
        let line = self
            .stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("");
        if line.is_empty() {
            format!("exit code {:?}", self.exit_code)
        } else {
            line.to_string()
        }
    }
}

/// Options for a single invocation
#[derive(Debug, Default)]
pub struct Invocation<'a> {
    /// Bytes written to the child's stdin
    pub stdin: Option<&'a [u8]>,

    /// Extra environment for the child
    pub envs: Vec<(String, String)>,

    /// Overrides the runner's default timeout
    pub timeout: Option<Duration>,
}

/// Runs `gcloud` subcommands against one project
#[derive(Debug, Clone)]
pub struct Gcloud {
    binary: PathBuf,
    project_id: String,
    default_timeout: Duration,
}

impl Gcloud {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            binary: PathBuf::from("gcloud"),
            project_id: project_id.into(),
            default_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Run a subcommand and capture its output
    pub async fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<CommandOutput, FleetError> {
        self.run_with(args, Invocation::default()).await
    }

    /// Run a subcommand with stdin, extra environment or a custom timeout.
    ///
    /// A non-zero exit is returned as output, not as an error. Only spawn
    /// failures and timeouts are errors.
    pub async fn run_with<S: AsRef<str>>(
        &self,
        args: &[S],
        invocation: Invocation<'_>,
    ) -> Result<CommandOutput, FleetError> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        let shown = format!("gcloud {}", args.join(" "));
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);
        debug!("Running: {}", shown);

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .arg(format!("--project={}", self.project_id))
            .arg("--quiet")
            .envs(invocation.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| FleetError::ProviderError(format!("Failed to run {}: {}", shown, e)))?;

        if let Some(input) = invocation.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).await?;
                stdin.shutdown().await?;
            }
        }

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FleetError::RemoteTimeout {
                    command: shown,
                    timeout,
                });
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// `describe` on a missing resource
pub fn is_not_found(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    stderr.contains("was not found") || stderr.contains("notfound") || stderr.contains("not_found")
}
