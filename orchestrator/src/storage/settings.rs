//! Settings file management

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Orchestrator settings, loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// GCP project that owns the fleet
    #[serde(default)]
    pub project_id: String,

    /// Compute zone
    #[serde(default = "default_zone")]
    pub zone: String,

    /// Number of instances to create
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,

    /// Machine type, e.g. `n1-standard-4`
    #[serde(default = "default_machine_type")]
    pub machine_type: String,

    /// Boot disk size in GB
    #[serde(default = "default_boot_disk_size")]
    pub boot_disk_size_gb: u32,

    /// Boot image family
    #[serde(default = "default_image_family")]
    pub image_family: String,

    /// Project hosting the boot image family
    #[serde(default = "default_image_project")]
    pub image_project: String,

    /// Instance name prefix
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Extra network tags
    #[serde(default = "default_network_tags")]
    pub network_tags: Vec<String>,

    /// Port the workload listens on
    #[serde(default = "default_service_port")]
    pub service_port: u16,

    /// Deploy the workload once each instance is ready
    #[serde(default = "default_true")]
    pub run_workload_on_create: bool,

    /// Print instance addresses in the summary
    #[serde(default = "default_true")]
    pub show_ip_addresses: bool,

    /// Delete the fleet after the run completes
    #[serde(default)]
    pub cleanup_after: bool,

    /// Have the startup script pull and run the image at boot
    #[serde(default)]
    pub boot_workload: bool,

    /// Maximum instance creations in flight
    #[serde(default = "default_creation_concurrency")]
    pub creation_concurrency: usize,

    /// Timeout for a single remote command in seconds
    #[serde(default = "default_remote_command_timeout")]
    pub remote_command_timeout_secs: u64,

    /// Readiness polling settings
    #[serde(default)]
    pub readiness: ReadinessSettings,

    /// Credential delivery settings
    #[serde(default)]
    pub credential: CredentialSettings,

    /// Workload settings
    #[serde(default)]
    pub workload: WorkloadSettings,

    /// Directory for manifests, logs and scratch files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Also write logs to a rolling file under the output directory
    #[serde(default)]
    pub log_to_file: bool,
}

fn default_true() -> bool {
    true
}

fn default_zone() -> String {
    "europe-west1-b".to_string()
}

fn default_instance_count() -> u32 {
    1
}

fn default_machine_type() -> String {
    "n1-standard-4".to_string()
}

fn default_boot_disk_size() -> u32 {
    50
}

fn default_image_family() -> String {
    "ubuntu-2204-lts".to_string()
}

fn default_image_project() -> String {
    "ubuntu-os-cloud".to_string()
}

fn default_name_prefix() -> String {
    "fleet".to_string()
}

fn default_network_tags() -> Vec<String> {
    vec!["http-server".to_string(), "https-server".to_string()]
}

fn default_service_port() -> u16 {
    5001
}

fn default_creation_concurrency() -> usize {
    1
}

fn default_remote_command_timeout() -> u64 {
    1800
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("deployments")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            project_id: String::new(),
            zone: default_zone(),
            instance_count: default_instance_count(),
            machine_type: default_machine_type(),
            boot_disk_size_gb: default_boot_disk_size(),
            image_family: default_image_family(),
            image_project: default_image_project(),
            name_prefix: default_name_prefix(),
            network_tags: default_network_tags(),
            service_port: default_service_port(),
            run_workload_on_create: true,
            show_ip_addresses: true,
            cleanup_after: false,
            boot_workload: false,
            creation_concurrency: default_creation_concurrency(),
            remote_command_timeout_secs: default_remote_command_timeout(),
            readiness: ReadinessSettings::default(),
            credential: CredentialSettings::default(),
            workload: WorkloadSettings::default(),
            output_dir: default_output_dir(),
            log_to_file: false,
        }
    }
}

/// Readiness polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// 1.0 keeps a fixed interval
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,

    /// Command proving the container runtime is up
    #[serde(default = "default_liveness_command")]
    pub liveness_command: String,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_interval() -> u64 {
    10
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_interval() -> u64 {
    60
}

fn default_liveness_command() -> String {
    "docker --version".to_string()
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_secs: default_interval(),
            backoff_multiplier: default_backoff_multiplier(),
            max_interval_secs: default_max_interval(),
            liveness_command: default_liveness_command(),
        }
    }
}

/// Credential delivery settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// Secret Manager entry; selects secret-store delivery when set
    #[serde(default)]
    pub secret_name: Option<String>,

    /// Service account key file; read in preference to `FLEET_CREDENTIALS_JSON`
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Extra entries written to the workload environment file
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Workload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSettings {
    /// Pre-built image reference; selects pull+run
    #[serde(default)]
    pub image: Option<String>,

    /// Local source directory; selects upload+build+run
    #[serde(default)]
    pub source_dir: Option<PathBuf>,

    /// Container name, derived from the image when absent
    #[serde(default)]
    pub container_name: Option<String>,

    /// Remote directory whose files are counted as artifacts
    #[serde(default = "default_artifact_dir")]
    pub output_dir: String,

    /// HTTP health path probed after deployment, `None` disables
    #[serde(default = "default_health_path")]
    pub health_path: Option<String>,
}

fn default_artifact_dir() -> String {
    "/var/lib/fleet/output".to_string()
}

fn default_health_path() -> Option<String> {
    Some("/health".to_string())
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            image: None,
            source_dir: None,
            container_name: None,
            output_dir: default_artifact_dir(),
            health_path: default_health_path(),
        }
    }
}
