//! Instance creation

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::authn::broker::CredentialDeliveryPayload;
use crate::cloud::provider::{ComputeProvider, CreateInstanceRequest};
use crate::deploy::startup::render_startup_script;
use crate::errors::FleetError;
use crate::models::instance::InstanceHandle;
use crate::models::manifest::ProvisionStatus;
use crate::models::spec::DeploymentSpec;

pub const STARTUP_SCRIPT_KEY: &str = "startup-script";
pub const RUN_LABEL: &str = "fleet-run";
pub const ORDINAL_LABEL: &str = "fleet-ordinal";

/// A created (or found) instance
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub handle: InstanceHandle,
    pub status: ProvisionStatus,
}

/// Creates fleet instances idempotently by name
pub struct InstanceProvisioner {
    provider: Arc<dyn ComputeProvider>,
}

impl InstanceProvisioner {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Self {
        Self { provider }
    }

    /// Build the create request for one ordinal
    pub fn request(
        spec: &DeploymentSpec,
        ordinal: u32,
        payload: &CredentialDeliveryPayload,
        run_timestamp: i64,
    ) -> CreateInstanceRequest {
        let mut network_tags = spec.network_tags.clone();
        let service_tag = spec.service_tag();
        if !network_tags.contains(&service_tag) {
            network_tags.push(service_tag);
        }

        let mut labels = BTreeMap::new();
        labels.insert(RUN_LABEL.to_string(), run_timestamp.to_string());
        labels.insert(ORDINAL_LABEL.to_string(), ordinal.to_string());

        let mut metadata = payload.metadata();
        metadata.insert(
            STARTUP_SCRIPT_KEY.to_string(),
            render_startup_script(spec, payload),
        );

        CreateInstanceRequest {
            name: spec.instance_name(run_timestamp, ordinal),
            zone: spec.zone.clone(),
            machine_type: spec.machine_type.clone(),
            boot_disk_size_gb: spec.boot_disk_size_gb,
            image_family: spec.image_family.clone(),
            image_project: spec.image_project.clone(),
            network_tags,
            labels,
            metadata,
        }
    }

    /// Create the instance for `ordinal`.
    ///
    /// An instance that already carries the computed name is returned as
    /// `AlreadyExists` without calling create.
    pub async fn create(
        &self,
        spec: &DeploymentSpec,
        ordinal: u32,
        payload: &CredentialDeliveryPayload,
        run_timestamp: i64,
    ) -> Result<Provisioned, FleetError> {
        let name = spec.instance_name(run_timestamp, ordinal);

        if let Some(existing) = self.provider.describe_instance(&name, &spec.zone).await? {
            info!("Instance {} already exists, skipping creation", name);
            return Ok(Provisioned {
                handle: InstanceHandle::from_status(existing, ordinal),
                status: ProvisionStatus::already_exists(),
            });
        }

        let request = Self::request(spec, ordinal, payload, run_timestamp);
        info!(
            "Creating instance {} ({}, {} GB, {})",
            name, spec.machine_type, spec.boot_disk_size_gb, payload.describe()
        );
        let status = self.provider.create_instance(&request).await?;

        Ok(Provisioned {
            handle: InstanceHandle::from_status(status, ordinal),
            status: ProvisionStatus::Created,
        })
    }
}
