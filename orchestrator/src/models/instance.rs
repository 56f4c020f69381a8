//! Instance models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Power state of a compute instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    Provisioning,
    Running,
    Stopped,
    Deleted,
}

impl PowerState {
    /// Map a Compute Engine status string
    pub fn from_gce_status(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "RUNNING" => PowerState::Running,
            "STOPPING" | "STOPPED" | "SUSPENDING" | "SUSPENDED" | "TERMINATED" => {
                PowerState::Stopped
            }
            "DELETED" => PowerState::Deleted,
            // PROVISIONING, STAGING, REPAIRING and anything new
            _ => PowerState::Provisioning,
        }
    }

    pub fn is_running(&self) -> bool {
        *self == PowerState::Running
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PowerState::Provisioning => "PROVISIONING",
            PowerState::Running => "RUNNING",
            PowerState::Stopped => "STOPPED",
            PowerState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Provider view of an instance, as returned by describe/create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub name: String,
    pub zone: String,
    pub power_state: PowerState,
    pub external_ip: Option<String>,
    pub internal_ip: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Identifies one instance of the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub name: String,
    pub zone: String,
    pub ordinal: u32,
    pub external_ip: Option<String>,
    pub internal_ip: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub power_state: PowerState,
}

impl InstanceHandle {
    /// Handle for an instance that has not been created (yet)
    pub fn planned(name: impl Into<String>, zone: impl Into<String>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            zone: zone.into(),
            ordinal,
            external_ip: None,
            internal_ip: None,
            created_at: None,
            power_state: PowerState::Provisioning,
        }
    }

    pub fn from_status(status: InstanceStatus, ordinal: u32) -> Self {
        Self {
            name: status.name,
            zone: status.zone,
            ordinal,
            external_ip: status.external_ip,
            internal_ip: status.internal_ip,
            created_at: status.created_at,
            power_state: status.power_state,
        }
    }

    /// Merge a fresh describe result; known addresses are never cleared
    pub fn refresh(&mut self, status: &InstanceStatus) {
        self.power_state = status.power_state;
        if status.external_ip.is_some() {
            self.external_ip = status.external_ip.clone();
        }
        if status.internal_ip.is_some() {
            self.internal_ip = status.internal_ip.clone();
        }
        if self.created_at.is_none() {
            self.created_at = status.created_at;
        }
    }
}
