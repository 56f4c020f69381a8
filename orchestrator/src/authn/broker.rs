//! Credential resolution and delivery
//!
//! The broker turns the operator's credential inputs into the metadata an
//! instance needs at boot to materialize its workload environment. It runs
//! once per fleet run, before any instance is created.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::authn::credential::{Credential, CredentialInput, CredentialOrigin};
use crate::authn::secret_store::SecretStore;
use crate::errors::FleetError;
use crate::models::spec::DeploymentSpec;

/// Env key carrying the service account key JSON
pub const CREDENTIAL_ENV_KEY: &str = "GOOGLE_CREDENTIALS_JSON";

pub const INLINE_METADATA_KEY: &str = "fleet-env-b64";
pub const SECRET_NAME_METADATA_KEY: &str = "fleet-secret-name";
pub const PROJECT_METADATA_KEY: &str = "fleet-project-id";

/// GCE limit for a single metadata value
pub const METADATA_VALUE_LIMIT: usize = 256 * 1024;

/// What each instance receives to find its credential
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialDeliveryPayload {
    /// Base64 delivery document embedded in metadata
    Inline { encoded: String, fingerprint: String },

    /// Reference to a Secret Manager entry
    SecretReference {
        secret_name: String,
        project_id: String,
        version: Option<String>,
    },
}

impl std::fmt::Debug for CredentialDeliveryPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialDeliveryPayload::Inline { encoded, fingerprint } => f
                .debug_struct("Inline")
                .field("encoded_len", &encoded.len())
                .field("fingerprint", fingerprint)
                .finish(),
            CredentialDeliveryPayload::SecretReference {
                secret_name,
                project_id,
                version,
            } => f
                .debug_struct("SecretReference")
                .field("secret_name", secret_name)
                .field("project_id", project_id)
                .field("version", version)
                .finish(),
        }
    }
}

impl CredentialDeliveryPayload {
    /// Instance metadata entries for this payload
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        match self {
            CredentialDeliveryPayload::Inline { encoded, .. } => {
                metadata.insert(INLINE_METADATA_KEY.to_string(), encoded.clone());
            }
            CredentialDeliveryPayload::SecretReference {
                secret_name,
                project_id,
                ..
            } => {
                metadata.insert(SECRET_NAME_METADATA_KEY.to_string(), secret_name.clone());
                metadata.insert(PROJECT_METADATA_KEY.to_string(), project_id.clone());
            }
        }
        metadata
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, CredentialDeliveryPayload::Inline { .. })
    }

    /// Loggable description, never the material itself
    pub fn describe(&self) -> String {
        match self {
            CredentialDeliveryPayload::Inline { fingerprint, .. } => {
                format!("inline (fingerprint {})", fingerprint)
            }
            CredentialDeliveryPayload::SecretReference {
                secret_name,
                version,
                ..
            } => format!(
                "secret {} (version {})",
                secret_name,
                version.as_deref().unwrap_or("latest")
            ),
        }
    }
}

/// Parse and compact service account JSON
pub fn parse_credential(raw: &SecretString, origin: CredentialOrigin) -> Result<Credential, FleetError> {
    let value: serde_json::Value = serde_json::from_str(raw.expose_secret())
        .map_err(|e| FleetError::InvalidCredential(format!("not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(FleetError::InvalidCredential(
            "expected a JSON object".to_string(),
        ));
    }
    let compact = serde_json::to_string(&value)?;
    Ok(Credential::new(SecretString::from(compact), origin))
}

fn check_env_entry(key: &str, value: &str) -> Result<(), FleetError> {
    if key.is_empty() || key.contains(['=', '\n', '\r']) || key.contains(char::is_whitespace) {
        return Err(FleetError::EncodingError(format!("invalid env key {:?}", key)));
    }
    if key == CREDENTIAL_ENV_KEY {
        return Err(FleetError::EncodingError(format!("env key {} is reserved", key)));
    }
    if value.contains(['\n', '\r']) {
        return Err(FleetError::EncodingError(format!(
            "value for {} contains a line break",
            key
        )));
    }
    Ok(())
}

/// Render the delivery document.
///
/// The credential line comes first, then `env` in key order, each as
/// `KEY=value` with a trailing newline.
pub fn render_env_document(
    credential: &Credential,
    env: &BTreeMap<String, String>,
) -> Result<SecretString, FleetError> {
    let material = credential.material().expose_secret();
    if material.contains(['\n', '\r']) {
        return Err(FleetError::EncodingError(
            "credential material contains a line break".to_string(),
        ));
    }

    let mut document = format!("{}={}\n", CREDENTIAL_ENV_KEY, material);
    for (key, value) in env {
        check_env_entry(key, value)?;
        document.push_str(key);
        document.push('=');
        document.push_str(value);
        document.push('\n');
    }
    Ok(SecretString::from(document))
}

/// Base64-encode a document for metadata, enforcing the size limit
pub fn encode_inline(document: &SecretString) -> Result<String, FleetError> {
    let encoded = STANDARD.encode(document.expose_secret().as_bytes());
    if encoded.len() > METADATA_VALUE_LIMIT {
        return Err(FleetError::PayloadTooLarge {
            size: encoded.len(),
            limit: METADATA_VALUE_LIMIT,
        });
    }
    Ok(encoded)
}

/// Inverse of [`encode_inline`]
pub fn decode_inline(encoded: &str) -> Result<SecretString, FleetError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| FleetError::EncodingError(format!("invalid base64: {}", e)))?;
    let document = String::from_utf8(bytes)
        .map_err(|e| FleetError::EncodingError(format!("invalid utf-8: {}", e)))?;
    Ok(SecretString::from(document))
}

/// Chooses a delivery mode and prepares the payload
pub struct CredentialBroker {
    store: Arc<dyn SecretStore>,
}

impl CredentialBroker {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Resolve the inputs into a payload.
    ///
    /// A secret name selects secret-store delivery; otherwise raw material
    /// is delivered inline.
    pub async fn resolve(
        &self,
        spec: &DeploymentSpec,
        input: &CredentialInput,
    ) -> Result<CredentialDeliveryPayload, FleetError> {
        match (&input.secret_name, &input.raw) {
            (Some(name), raw) => self.resolve_secret(spec, name, raw.as_ref(), &input.env).await,
            (None, Some(raw)) => {
                let credential = parse_credential(raw, CredentialOrigin::Inline)?;
                let document = render_env_document(&credential, &input.env)?;
                let encoded = encode_inline(&document)?;
                info!(
                    "Delivering credential inline ({} bytes, fingerprint {})",
                    encoded.len(),
                    credential.fingerprint()
                );
                Ok(CredentialDeliveryPayload::Inline {
                    encoded,
                    fingerprint: credential.fingerprint(),
                })
            }
            (None, None) => Err(FleetError::MissingCredential(
                "no credential material and no secret name".to_string(),
            )),
        }
    }

    async fn resolve_secret(
        &self,
        spec: &DeploymentSpec,
        name: &str,
        raw: Option<&SecretString>,
        env: &BTreeMap<String, String>,
    ) -> Result<CredentialDeliveryPayload, FleetError> {
        if name.trim().is_empty() {
            return Err(FleetError::MissingCredential("secret name is empty".to_string()));
        }
        let exists = self.store.exists(name).await?;

        let version = match raw {
            Some(raw) => {
                let credential = parse_credential(
                    raw,
                    CredentialOrigin::SecretStore {
                        name: name.to_string(),
                    },
                )?;
                let document = render_env_document(&credential, env)?;
                let version = if exists {
                    self.store.add_version(name, &document).await?
                } else {
                    self.store.create(name, &document).await?
                };
                info!(
                    "Stored credential in secret {} version {} (fingerprint {})",
                    name,
                    version,
                    credential.fingerprint()
                );
                Some(version)
            }
            None if exists => {
                info!("Using existing secret {} by reference", name);
                None
            }
            None => {
                return Err(FleetError::MissingCredential(format!(
                    "secret {} does not exist and no credential material was given",
                    name
                )));
            }
        };

        Ok(CredentialDeliveryPayload::SecretReference {
            secret_name: name.to_string(),
            project_id: spec.project_id.clone(),
            version,
        })
    }
}
