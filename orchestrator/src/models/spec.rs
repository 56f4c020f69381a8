//! Deployment specification
//!
//! A `DeploymentSpec` is built once from the settings file, validated, and
//! then shared read-only by every component of a fleet run.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::FleetError;
use crate::storage::settings::Settings;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Largest fleet a single run may create
pub const MAX_INSTANCES: u32 = 20;

/// Smallest boot disk accepted by the base images
pub const MIN_BOOT_DISK_GB: u32 = 10;

/// Longest name Compute Engine accepts for instances and firewall rules
pub const MAX_RESOURCE_NAME_LEN: usize = 63;

/// Instance names are limited to 63 characters; the suffix takes up to 15
pub const MAX_PREFIX_LEN: usize = 48;

/// Where the boot script materializes the workload environment
pub const WORKLOAD_ENV_FILE: &str = "/etc/fleet/workload.env";

/// Immutable configuration for one fleet run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub project_id: String,
    pub zone: String,
    pub instance_count: u32,
    pub machine_type: String,
    pub boot_disk_size_gb: u32,
    pub image_family: String,
    pub image_project: String,
    pub name_prefix: String,
    pub network_tags: Vec<String>,
    pub service_port: u16,
    pub run_workload_on_create: bool,
    pub show_ip_addresses: bool,
    pub cleanup_after: bool,
    pub boot_workload: bool,
    pub creation_concurrency: usize,
    pub remote_command_timeout: Duration,
    pub readiness: ReadinessOptions,
    pub workload: WorkloadRef,
}

impl DeploymentSpec {
    /// Build and validate a spec from loaded settings
    pub fn from_settings(settings: &Settings) -> Result<Self, FleetError> {
        let workload = &settings.workload;
        let container_name = match &workload.container_name {
            Some(name) => name.clone(),
            None => match &workload.image {
                Some(image) => container_name_from_image(image),
                None => settings.name_prefix.clone(),
            },
        };

        let spec = Self {
            project_id: settings.project_id.clone(),
            zone: settings.zone.clone(),
            instance_count: settings.instance_count,
            machine_type: settings.machine_type.clone(),
            boot_disk_size_gb: settings.boot_disk_size_gb,
            image_family: settings.image_family.clone(),
            image_project: settings.image_project.clone(),
            name_prefix: settings.name_prefix.clone(),
            network_tags: settings.network_tags.clone(),
            service_port: settings.service_port,
            run_workload_on_create: settings.run_workload_on_create,
            show_ip_addresses: settings.show_ip_addresses,
            cleanup_after: settings.cleanup_after,
            boot_workload: settings.boot_workload,
            creation_concurrency: settings.creation_concurrency,
            remote_command_timeout: Duration::from_secs(settings.remote_command_timeout_secs),
            readiness: ReadinessOptions {
                max_attempts: settings.readiness.max_attempts,
                interval: Duration::from_secs(settings.readiness.interval_secs),
                backoff_multiplier: settings.readiness.backoff_multiplier,
                max_interval: Duration::from_secs(settings.readiness.max_interval_secs),
                liveness_command: settings.readiness.liveness_command.clone(),
            },
            workload: WorkloadRef {
                image: workload.image.clone(),
                source_dir: workload.source_dir.clone(),
                container_name,
                service_port: settings.service_port,
                env_file: WORKLOAD_ENV_FILE.to_string(),
                output_dir: workload.output_dir.clone(),
                health_path: workload.health_path.clone(),
            },
        };

        spec.validate()?;
        Ok(spec)
    }

    /// Check every invariant a run depends on
    pub fn validate(&self) -> Result<(), FleetError> {
        if self.project_id.trim().is_empty() {
            return Err(FleetError::InvalidSpec("project_id is required".to_string()));
        }
        if self.zone.trim().is_empty() {
            return Err(FleetError::InvalidSpec("zone is required".to_string()));
        }
        if !(1..=MAX_INSTANCES).contains(&self.instance_count) {
            return Err(FleetError::InvalidSpec(format!(
                "instance_count must be between 1 and {}, got {}",
                MAX_INSTANCES, self.instance_count
            )));
        }
        if self.machine_type.trim().is_empty() || self.machine_type.contains(char::is_whitespace) {
            return Err(FleetError::InvalidSpec(format!(
                "invalid machine_type: {:?}",
                self.machine_type
            )));
        }
        if self.boot_disk_size_gb < MIN_BOOT_DISK_GB {
            return Err(FleetError::InvalidSpec(format!(
                "boot_disk_size_gb must be at least {}",
                MIN_BOOT_DISK_GB
            )));
        }
        validate_name_prefix(&self.name_prefix)?;
        if self.service_port == 0 {
            return Err(FleetError::InvalidSpec("service_port must be non-zero".to_string()));
        }
        let rule_name = self.service_rule_name();
        if rule_name.len() > MAX_RESOURCE_NAME_LEN {
            return Err(FleetError::InvalidSpec(format!(
                "firewall rule name {} exceeds {} characters; shorten name_prefix",
                rule_name, MAX_RESOURCE_NAME_LEN
            )));
        }
        if self.creation_concurrency == 0 {
            return Err(FleetError::InvalidSpec(
                "creation_concurrency must be at least 1".to_string(),
            ));
        }
        if self.readiness.max_attempts == 0 {
            return Err(FleetError::InvalidSpec(
                "readiness.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.readiness.liveness_command.trim().is_empty() {
            return Err(FleetError::InvalidSpec(
                "readiness.liveness_command is required".to_string(),
            ));
        }
        if self.run_workload_on_create
            && self.workload.image.is_none()
            && self.workload.source_dir.is_none()
        {
            return Err(FleetError::InvalidSpec(
                "run_workload_on_create needs workload.image or workload.source_dir".to_string(),
            ));
        }
        if self.boot_workload && self.workload.image.is_none() {
            return Err(FleetError::InvalidSpec(
                "boot_workload needs workload.image".to_string(),
            ));
        }
        if self.workload.container_name.is_empty() {
            return Err(FleetError::InvalidSpec("workload container name is empty".to_string()));
        }
        Ok(())
    }

    /// `{prefix}-{timestamp}-{ordinal}`
    pub fn instance_name(&self, run_timestamp: i64, ordinal: u32) -> String {
        format!("{}-{}-{}", self.name_prefix, run_timestamp, ordinal)
    }

    /// Network tag the service-port firewall rule targets
    pub fn service_tag(&self) -> String {
        format!("{}-service", self.name_prefix)
    }

    /// Firewall rule opening the service port to the fleet
    pub fn service_rule_name(&self) -> String {
        format!("fleet-allow-{}-{}", self.name_prefix, self.service_port)
    }

    /// Number of creations allowed in flight at once
    pub fn effective_creation_concurrency(&self) -> usize {
        self.creation_concurrency.min(self.instance_count as usize).max(1)
    }
}

fn validate_name_prefix(prefix: &str) -> Result<(), FleetError> {
    let valid = !prefix.is_empty()
        && prefix.len() <= MAX_PREFIX_LEN
        && prefix.starts_with(|c: char| c.is_ascii_lowercase())
        && !prefix.ends_with('-')
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(FleetError::InvalidSpec(format!(
            "name_prefix {:?} must be a lowercase label of at most {} characters",
            prefix, MAX_PREFIX_LEN
        )))
    }
}

/// Derive a container name from an image reference.
///
/// `gcr.io/remix/category-predictor:v3` becomes `category-predictor`.
pub fn container_name_from_image(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    let name = last.split(['@', ':']).next().unwrap_or(last);
    if name.is_empty() {
        "workload".to_string()
    } else {
        name.to_string()
    }
}

/// Readiness polling policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessOptions {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_multiplier: f64,
    pub max_interval: Duration,
    pub liveness_command: String,
}

impl ReadinessOptions {
    /// Delay after the given zero-based attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let cooldown = CooldownOptions {
            base_delay: self.interval,
            max_delay: self.max_interval.max(self.interval),
            multiplier: self.backoff_multiplier.max(1.0),
        };
        calc_exp_backoff(&cooldown, attempt)
    }
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(10),
            backoff_multiplier: 1.0,
            max_interval: Duration::from_secs(60),
            liveness_command: "docker --version".to_string(),
        }
    }
}

/// How the workload reaches an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WorkloadStrategy {
    /// Pull a pre-built image and run it
    Image { reference: String },
    /// Upload sources, build remotely, then run
    Source { local_dir: PathBuf },
}

/// Workload to deploy on each ready instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub image: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub container_name: String,
    pub service_port: u16,
    pub env_file: String,
    pub output_dir: String,
    pub health_path: Option<String>,
}

impl WorkloadRef {
    /// Image wins when both an image and a source directory are configured
    pub fn strategy(&self) -> Option<WorkloadStrategy> {
        if let Some(reference) = &self.image {
            return Some(WorkloadStrategy::Image {
                reference: reference.clone(),
            });
        }
        self.source_dir.as_ref().map(|dir| WorkloadStrategy::Source {
            local_dir: dir.clone(),
        })
    }
}
