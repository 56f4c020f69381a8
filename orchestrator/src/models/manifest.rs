//! Deployment results and manifest models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::ReadinessState;
use crate::models::instance::InstanceHandle;
use crate::models::spec::DeploymentSpec;

/// What happened when the instance was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ProvisionStatus {
    /// Created by this run
    Created,

    /// An instance with the computed name already existed
    AlreadyExists { note: String },

    /// The create call failed
    Failed { error: String },
}

impl ProvisionStatus {
    pub fn already_exists() -> Self {
        ProvisionStatus::AlreadyExists {
            note: "skipped: already exists".to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProvisionStatus::Failed { .. })
    }
}

/// Outcome of the workload stage for one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResult {
    /// Whether the instance completed every requested stage
    pub success: bool,

    /// Error detail when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Number of files in the workload output directory
    pub artifact_count: u64,

    /// Total size of those files in bytes
    pub artifact_bytes: u64,

    /// Result of the HTTP health probe, when one ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,

    /// `image` or `source`, absent when nothing was deployed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Set when the run did not ask for a workload
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not_requested: bool,
}

impl WorkloadResult {
    pub fn succeeded(artifact_count: u64, artifact_bytes: u64) -> Self {
        Self {
            success: true,
            error: None,
            artifact_count,
            artifact_bytes,
            healthy: None,
            strategy: None,
            not_requested: false,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            artifact_count: 0,
            artifact_bytes: 0,
            healthy: None,
            strategy: None,
            not_requested: false,
        }
    }

    /// The instance is ready and no workload deployment was requested.
    ///
    /// Counts as a success: the instance did everything the run asked of it.
    pub fn not_requested() -> Self {
        Self {
            not_requested: true,
            ..Self::succeeded(0, 0)
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }
}

/// Everything recorded for one instance by its pipeline task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceOutcome {
    pub handle: InstanceHandle,
    pub provisioning: ProvisionStatus,
    pub readiness: Option<ReadinessState>,
    pub result: WorkloadResult,
}

impl InstanceOutcome {
    /// Outcome for an instance that never got past creation
    pub fn provisioning_failed(handle: InstanceHandle, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            handle,
            provisioning: ProvisionStatus::Failed {
                error: error.clone(),
            },
            readiness: None,
            result: WorkloadResult::failed(error),
        }
    }
}

/// One line of the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub ordinal: u32,
    pub instance: InstanceHandle,
    pub provisioning: ProvisionStatus,
    pub readiness: Option<ReadinessState>,
    pub result: WorkloadResult,
}

impl ManifestEntry {
    pub fn is_ready(&self) -> bool {
        self.readiness.as_ref().is_some_and(|r| r.is_ready())
    }

    pub fn is_success(&self) -> bool {
        !self.provisioning.is_failed() && self.is_ready() && self.result.success
    }
}

/// Persisted record of a completed fleet run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub run_id: String,
    pub run_timestamp: i64,
    pub generated_at: DateTime<Utc>,
    pub spec: DeploymentSpec,
    pub entries: Vec<ManifestEntry>,
    #[serde(default)]
    pub cleaned_up: bool,
}

impl DeploymentManifest {
    pub fn attempted(&self) -> usize {
        self.entries.len()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.is_success()).count()
    }

    /// Names of instances that exist in the project after this run
    pub fn live_instance_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| !e.provisioning.is_failed())
            .filter(|e| !(self.cleaned_up && e.provisioning == ProvisionStatus::Created))
            .map(|e| e.instance.name.as_str())
            .collect()
    }

    /// `N/M instances succeeded`
    pub fn summary_line(&self) -> String {
        format!("{}/{} instances succeeded", self.succeeded(), self.attempted())
    }
}
