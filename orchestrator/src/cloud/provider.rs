//! Compute provider abstraction

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::FleetError;
use crate::models::instance::InstanceStatus;

/// Everything needed to create one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub boot_disk_size_gb: u32,
    pub image_family: String,
    pub image_project: String,
    pub network_tags: Vec<String>,
    pub labels: BTreeMap<String, String>,

    /// Instance metadata, including `startup-script`
    pub metadata: BTreeMap<String, String>,
}

/// An ingress firewall rule allowing TCP ports to tagged instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub network: String,
    pub tcp_ports: Vec<u16>,
    pub target_tags: Vec<String>,
    pub source_ranges: Vec<String>,
}

impl FirewallRule {
    /// Describe how `existing` differs from this rule, if it does
    pub fn conflict_with(&self, existing: &FirewallRule) -> Option<String> {
        let mut differences = Vec::new();

        let want: BTreeSet<u16> = self.tcp_ports.iter().copied().collect();
        let have: BTreeSet<u16> = existing.tcp_ports.iter().copied().collect();
        if want != have {
            differences.push(format!("tcp ports {:?} != {:?}", have, want));
        }

        let want: BTreeSet<&str> = self.target_tags.iter().map(String::as_str).collect();
        let have: BTreeSet<&str> = existing.target_tags.iter().map(String::as_str).collect();
        if want != have {
            differences.push(format!("target tags {:?} != {:?}", have, want));
        }

        let want: BTreeSet<&str> = self.source_ranges.iter().map(String::as_str).collect();
        let have: BTreeSet<&str> = existing.source_ranges.iter().map(String::as_str).collect();
        if want != have {
            differences.push(format!("source ranges {:?} != {:?}", have, want));
        }

        if self.network != existing.network {
            differences.push(format!("network {} != {}", existing.network, self.network));
        }

        if differences.is_empty() {
            None
        } else {
            Some(differences.join("; "))
        }
    }
}

/// Cloud control-plane operations used by a fleet run
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// The authenticated account, `None` when no credentials are active
    async fn active_account(&self) -> Result<Option<String>, FleetError>;

    /// Look up an instance; `None` when it does not exist
    async fn describe_instance(
        &self,
        name: &str,
        zone: &str,
    ) -> Result<Option<InstanceStatus>, FleetError>;

    /// Create an instance. Addresses may be missing from the result.
    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceStatus, FleetError>;

    async fn delete_instance(&self, name: &str, zone: &str) -> Result<(), FleetError>;

    /// Look up a firewall rule; `None` when it does not exist
    async fn describe_firewall_rule(&self, name: &str) -> Result<Option<FirewallRule>, FleetError>;

    async fn create_firewall_rule(&self, rule: &FirewallRule) -> Result<(), FleetError>;
}
