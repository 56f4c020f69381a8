//! Versioned secret storage

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::debug;

use crate::cloud::gcloud::{is_not_found, Gcloud, Invocation};
use crate::errors::FleetError;

/// A centralized store that keeps every version of a secret.
///
/// Writes never replace history: `create` makes the entry with its first
/// version and `add_version` appends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, FleetError>;

    /// Create the entry with `value` as version 1; returns the version id
    async fn create(&self, name: &str, value: &SecretString) -> Result<String, FleetError>;

    /// Append a new version; returns its id
    async fn add_version(&self, name: &str, value: &SecretString) -> Result<String, FleetError>;

    /// Value of the newest version, `None` if the entry does not exist
    async fn access_latest(&self, name: &str) -> Result<Option<SecretString>, FleetError>;

    /// Version ids, newest first
    async fn versions(&self, name: &str) -> Result<Vec<String>, FleetError>;
}

/// In-memory store for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    data: Arc<RwLock<HashMap<String, Vec<SecretString>>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn exists(&self, name: &str) -> Result<bool, FleetError> {
        Ok(self.data.read().await.contains_key(name))
    }

    async fn create(&self, name: &str, value: &SecretString) -> Result<String, FleetError> {
        let mut data = self.data.write().await;
        if data.contains_key(name) {
            return Err(FleetError::SecretStoreError(format!("secret {} already exists", name)));
        }
        data.insert(name.to_string(), vec![value.clone()]);
        Ok("1".to_string())
    }

    async fn add_version(&self, name: &str, value: &SecretString) -> Result<String, FleetError> {
        let mut data = self.data.write().await;
        let versions = data
            .get_mut(name)
            .ok_or_else(|| FleetError::SecretStoreError(format!("secret {} not found", name)))?;
        versions.push(value.clone());
        Ok(versions.len().to_string())
    }

    async fn access_latest(&self, name: &str) -> Result<Option<SecretString>, FleetError> {
        Ok(self
            .data
            .read()
            .await
            .get(name)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn versions(&self, name: &str) -> Result<Vec<String>, FleetError> {
        let count = self.data.read().await.get(name).map(Vec::len).unwrap_or(0);
        Ok((1..=count).rev().map(|v| v.to_string()).collect())
    }
}

/// Secret Manager through `gcloud secrets`
pub struct GcloudSecretStore {
    gcloud: Gcloud,
}

impl GcloudSecretStore {
    pub fn new(gcloud: Gcloud) -> Self {
        Self { gcloud }
    }
}

/// `projects/p/secrets/s/versions/3` -> `3`
fn version_id(resource: &str) -> String {
    resource.trim().rsplit('/').next().unwrap_or_default().to_string()
}

#[async_trait]
impl SecretStore for GcloudSecretStore {
    async fn exists(&self, name: &str) -> Result<bool, FleetError> {
        let output = self
            .gcloud
            .run(&["secrets", "describe", name, "--format=value(name)"])
            .await?;
        if output.success() {
            Ok(true)
        } else if is_not_found(&output) {
            Ok(false)
        } else {
            Err(FleetError::SecretStoreError(output.error_message()))
        }
    }

    async fn create(&self, name: &str, value: &SecretString) -> Result<String, FleetError> {
        debug!("Creating secret {}", name);
        let output = self
            .gcloud
            .run_with(
                &[
                    "secrets",
                    "create",
                    name,
                    "--replication-policy=automatic",
                    "--data-file=-",
                ],
                Invocation {
                    stdin: Some(value.expose_secret().as_bytes()),
                    ..Default::default()
                },
            )
            .await?;
        if !output.success() {
            return Err(FleetError::SecretStoreError(output.error_message()));
        }
        Ok("1".to_string())
    }

    async fn add_version(&self, name: &str, value: &SecretString) -> Result<String, FleetError> {
        debug!("Adding version to secret {}", name);
        let output = self
            .gcloud
            .run_with(
                &[
                    "secrets",
                    "versions",
                    "add",
                    name,
                    "--data-file=-",
                    "--format=value(name)",
                ],
                Invocation {
                    stdin: Some(value.expose_secret().as_bytes()),
                    ..Default::default()
                },
            )
            .await?;
        if !output.success() {
            return Err(FleetError::SecretStoreError(output.error_message()));
        }
        Ok(version_id(&output.stdout))
    }

    async fn access_latest(&self, name: &str) -> Result<Option<SecretString>, FleetError> {
        let secret_arg = format!("--secret={}", name);
        let output = self
            .gcloud
            .run(&["secrets", "versions", "access", "latest", secret_arg.as_str()])
            .await?;
        if output.success() {
            Ok(Some(SecretString::from(output.stdout)))
        } else if is_not_found(&output) {
            Ok(None)
        } else {
            Err(FleetError::SecretStoreError(output.error_message()))
        }
    }

    async fn versions(&self, name: &str) -> Result<Vec<String>, FleetError> {
        let output = self
            .gcloud
            .run(&[
                "secrets",
                "versions",
                "list",
                name,
                "--sort-by=~createTime",
                "--format=value(name)",
            ])
            .await?;
        if !output.success() {
            if is_not_found(&output) {
                return Ok(Vec::new());
            }
            return Err(FleetError::SecretStoreError(output.error_message()));
        }
        Ok(output
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(version_id)
            .collect())
    }
}
