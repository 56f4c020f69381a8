//! Compute Engine provider backed by the `gcloud` CLI

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::cloud::gcloud::{is_not_found, CommandOutput, Gcloud};
use crate::cloud::provider::{ComputeProvider, CreateInstanceRequest, FirewallRule};
use crate::errors::FleetError;
use crate::filesys::dir::Dir;
use crate::models::instance::{InstanceStatus, PowerState};

/// `ComputeProvider` that shells out to `gcloud compute`
pub struct GcloudCompute {
    gcloud: Gcloud,
    work_dir: Dir,
}

impl GcloudCompute {
    /// `work_dir` holds short-lived metadata files during instance creation
    pub fn new(gcloud: Gcloud, work_dir: Dir) -> Self {
        Self { gcloud, work_dir }
    }

    async fn create_with_metadata_dir(
        &self,
        request: &CreateInstanceRequest,
        metadata_dir: &Dir,
    ) -> Result<InstanceStatus, FleetError> {
        let mut metadata_args = Vec::with_capacity(request.metadata.len());
        for (key, value) in &request.metadata {
            let file = metadata_dir.file(key);
            file.write_private(value).await?;
            metadata_args.push(format!("{}={}", key, file.path().display()));
        }

        let mut args = vec![
            "compute".to_string(),
            "instances".to_string(),
            "create".to_string(),
            request.name.clone(),
            format!("--zone={}", request.zone),
            format!("--machine-type={}", request.machine_type),
            format!("--boot-disk-size={}GB", request.boot_disk_size_gb),
            format!("--image-family={}", request.image_family),
            format!("--image-project={}", request.image_project),
            "--scopes=cloud-platform".to_string(),
            "--format=json".to_string(),
        ];
        if !request.network_tags.is_empty() {
            args.push(format!("--tags={}", request.network_tags.join(",")));
        }
        if !request.labels.is_empty() {
            let labels: Vec<String> =
                request.labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            args.push(format!("--labels={}", labels.join(",")));
        }
        if !metadata_args.is_empty() {
            args.push(format!("--metadata-from-file={}", metadata_args.join(",")));
        }

        let output = self.gcloud.run(&args).await?;
        if !output.success() {
            return Err(classify_provider_error(&output));
        }

        let created: Vec<GceInstance> = serde_json::from_str(&output.stdout)?;
        let instance = created.into_iter().next().ok_or_else(|| {
            FleetError::ProviderError(format!("create returned no instance for {}", request.name))
        })?;
        Ok(instance.into_status(&request.zone))
    }
}

#[async_trait]
impl ComputeProvider for GcloudCompute {
    async fn active_account(&self) -> Result<Option<String>, FleetError> {
        let output = self
            .gcloud
            .run(&["auth", "list", "--filter=status:ACTIVE", "--format=value(account)"])
            .await?;
        if !output.success() {
            return Err(FleetError::AuthUnavailable(output.error_message()));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }

    async fn describe_instance(
        &self,
        name: &str,
        zone: &str,
    ) -> Result<Option<InstanceStatus>, FleetError> {
        let output = self
            .gcloud
            .run(&[
                "compute",
                "instances",
                "describe",
                name,
                format!("--zone={}", zone).as_str(),
                "--format=json",
            ])
            .await?;
        if !output.success() {
            if is_not_found(&output) {
                return Ok(None);
            }
            return Err(classify_provider_error(&output));
        }
        let instance: GceInstance = serde_json::from_str(&output.stdout)?;
        Ok(Some(instance.into_status(zone)))
    }

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceStatus, FleetError> {
        info!("Creating instance {} in {}", request.name, request.zone);
        let metadata_dir = self.work_dir.create_temp_dir(&request.name).await?;
        let result = self.create_with_metadata_dir(request, &metadata_dir).await;
        if let Err(e) = metadata_dir.delete().await {
            debug!("Failed to remove metadata dir for {}: {}", request.name, e);
        }
        result
    }

    async fn delete_instance(&self, name: &str, zone: &str) -> Result<(), FleetError> {
        info!("Deleting instance {} in {}", name, zone);
        let output = self
            .gcloud
            .run(&["compute", "instances", "delete", name, format!("--zone={}", zone).as_str()])
            .await?;
        if !output.success() && !is_not_found(&output) {
            return Err(classify_provider_error(&output));
        }
        Ok(())
    }

    async fn describe_firewall_rule(&self, name: &str) -> Result<Option<FirewallRule>, FleetError> {
        let output = self
            .gcloud
            .run(&["compute", "firewall-rules", "describe", name, "--format=json"])
            .await?;
        if !output.success() {
            if is_not_found(&output) {
                return Ok(None);
            }
            return Err(classify_provider_error(&output));
        }
        let rule: GceFirewall = serde_json::from_str(&output.stdout)?;
        Ok(Some(rule.into_rule()))
    }

    async fn create_firewall_rule(&self, rule: &FirewallRule) -> Result<(), FleetError> {
        info!("Creating firewall rule {}", rule.name);
        let allow: Vec<String> = rule.tcp_ports.iter().map(|p| format!("tcp:{}", p)).collect();
        let args = vec![
            "compute".to_string(),
            "firewall-rules".to_string(),
            "create".to_string(),
            rule.name.clone(),
            format!("--network={}", rule.network),
            "--direction=INGRESS".to_string(),
            format!("--allow={}", allow.join(",")),
            format!("--target-tags={}", rule.target_tags.join(",")),
            format!("--source-ranges={}", rule.source_ranges.join(",")),
        ];
        let output = self.gcloud.run(&args).await?;
        if !output.success() {
            return Err(FleetError::NetworkSetupFailure(output.error_message()));
        }
        Ok(())
    }
}

/// Map a failed `gcloud compute` call onto the provisioning error taxonomy
pub fn classify_provider_error(output: &CommandOutput) -> FleetError {
    let message = output.error_message();
    let stderr = output.stderr.to_lowercase();

    if stderr.contains("quota") {
        FleetError::QuotaExceeded(message)
    } else if stderr.contains("machinetype") || stderr.contains("machine type") {
        FleetError::InvalidMachineShape(message)
    } else if stderr.contains("subnetwork")
        || stderr.contains("network")
        || stderr.contains("firewall")
    {
        FleetError::NetworkSetupFailure(message)
    } else {
        FleetError::ProviderError(message)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GceInstance {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    creation_timestamp: Option<String>,
    #[serde(default)]
    network_interfaces: Vec<GceNetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GceNetworkInterface {
    #[serde(rename = "networkIP", default)]
    network_ip: Option<String>,
    #[serde(default)]
    access_configs: Vec<GceAccessConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GceAccessConfig {
    #[serde(rename = "natIP", default)]
    nat_ip: Option<String>,
}

impl GceInstance {
    fn into_status(self, zone: &str) -> InstanceStatus {
        let interface = self.network_interfaces.into_iter().next();
        let (internal_ip, external_ip) = match interface {
            Some(nic) => {
                let nat = nic.access_configs.into_iter().find_map(|c| c.nat_ip);
                (nic.network_ip, nat)
            }
            None => (None, None),
        };
        let created_at = self
            .creation_timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        InstanceStatus {
            name: self.name,
            zone: zone.to_string(),
            power_state: PowerState::from_gce_status(&self.status),
            external_ip,
            internal_ip,
            created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GceFirewall {
    name: String,
    #[serde(default)]
    network: String,
    #[serde(default)]
    allowed: Vec<GceAllowed>,
    #[serde(default)]
    target_tags: Vec<String>,
    #[serde(default)]
    source_ranges: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GceAllowed {
    #[serde(rename = "IPProtocol")]
    ip_protocol: String,
    #[serde(default)]
    ports: Vec<String>,
}

impl GceFirewall {
    fn into_rule(self) -> FirewallRule {
        let tcp_ports = self
            .allowed
            .iter()
            .filter(|a| a.ip_protocol.eq_ignore_ascii_case("tcp"))
            .flat_map(|a| a.ports.iter())
            .filter_map(|p| p.parse::<u16>().ok())
            .collect();
        let network = self
            .network
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        FirewallRule {
            name: self.name,
            network,
            tcp_ports,
            target_tags: self.target_tags,
            source_ranges: self.source_ranges,
        }
    }
}
