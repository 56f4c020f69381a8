//! Application configuration options

use std::path::PathBuf;

use secrecy::SecretString;

use crate::authn::credential::CredentialInput;
use crate::deploy::health::HealthOptions;
use crate::errors::FleetError;
use crate::filesys::file::File;
use crate::models::spec::DeploymentSpec;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Everything a fleet run needs, resolved by the entry point
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Validated deployment spec
    pub spec: DeploymentSpec,

    /// Credential material, secret name and workload env
    pub credential: CredentialInput,

    /// Output locations
    pub layout: StorageLayout,

    /// Path to the `gcloud` binary
    pub gcloud_binary: PathBuf,

    /// Passphrase for the SSH key, if it has one
    pub ssh_passphrase: Option<SecretString>,

    /// HTTP health probing of deployed workloads; `None` disables it
    pub health: Option<HealthOptions>,
}

impl AppOptions {
    pub fn new(spec: DeploymentSpec, credential: CredentialInput) -> Self {
        Self {
            spec,
            credential,
            layout: StorageLayout::default(),
            gcloud_binary: PathBuf::from("gcloud"),
            ssh_passphrase: None,
            health: Some(HealthOptions::default()),
        }
    }
}

/// Collect credential inputs.
///
/// The configured key file takes precedence over `env_material`, the value of
/// the credentials environment variable read by the caller.
pub async fn credential_input(
    settings: &Settings,
    env_material: Option<SecretString>,
) -> Result<CredentialInput, FleetError> {
    let raw = match &settings.credential.key_file {
        Some(path) => Some(SecretString::from(File::new(path).read_string().await?)),
        None => env_material,
    };
    Ok(CredentialInput {
        raw,
        secret_name: settings.credential.secret_name.clone(),
        env: settings.credential.env.clone(),
    })
}
