//! Docker command construction
//!
//! Commands are rendered as shell strings because they run on the instance,
//! either over ssh or from the boot script.

use crate::models::spec::WorkloadRef;
use crate::utils::shell_quote;

/// Tag given to images built from uploaded sources
pub const LOCAL_TAG: &str = "fleet-local";

/// Docker commands for one workload container
#[derive(Debug, Clone)]
pub struct DockerCommands {
    container_name: String,
    service_port: u16,
    env_file: String,
    output_dir: String,
    sudo: bool,
}

impl DockerCommands {
    pub fn new(workload: &WorkloadRef) -> Self {
        Self {
            container_name: workload.container_name.clone(),
            service_port: workload.service_port,
            env_file: workload.env_file.clone(),
            output_dir: workload.output_dir.clone(),
            sudo: true,
        }
    }

    /// Commands run as root already; drop the `sudo` prefix
    pub fn as_root(mut self) -> Self {
        self.sudo = false;
        self
    }

    fn docker(&self) -> &'static str {
        if self.sudo {
            "sudo docker"
        } else {
            "docker"
        }
    }

    fn sudo(&self) -> &'static str {
        if self.sudo {
            "sudo "
        } else {
            ""
        }
    }

    pub fn pull(&self, image: &str) -> String {
        format!("{} pull {}", self.docker(), shell_quote(image))
    }

    /// Remove a previous container of the same name, if any
    pub fn remove(&self) -> String {
        format!(
            "{} rm -f {} >/dev/null 2>&1 || true",
            self.docker(),
            shell_quote(&self.container_name)
        )
    }

    pub fn build(&self, context_dir: &str) -> String {
        format!(
            "{} build -t {} {}",
            self.docker(),
            shell_quote(&self.local_image()),
            context_dir
        )
    }

    pub fn run(&self, image: &str) -> String {
        format!(
            "{sudo}mkdir -p {out} && {docker} run -d --name {name} --restart unless-stopped \
             -p {port}:{port} --env-file {env} -v {out}:{out} {image}",
            sudo = self.sudo(),
            docker = self.docker(),
            name = shell_quote(&self.container_name),
            port = self.service_port,
            env = shell_quote(&self.env_file),
            out = shell_quote(&self.output_dir),
            image = shell_quote(image),
        )
    }

    /// Image reference for locally built sources
    pub fn local_image(&self) -> String {
        format!("{}:{}", self.container_name, LOCAL_TAG)
    }

    /// Pull a published image and (re)start the container from it
    pub fn pull_and_run(&self, image: &str) -> String {
        [self.pull(image), self.remove(), self.run(image)].join(" && ")
    }

    /// Build from sources at `context_dir` and (re)start the container
    pub fn build_and_run(&self, context_dir: &str) -> String {
        let image = self.local_image();
        [
            self.build(context_dir),
            self.remove(),
            self.run(&image),
        ]
        .join(" && ")
    }
}
