//! Service account credential

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::utils::fingerprint;

/// Where a credential is distributed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CredentialOrigin {
    /// Embedded in instance metadata
    Inline,

    /// Stored in Secret Manager under `name`
    SecretStore { name: String },
}

impl std::fmt::Display for CredentialOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialOrigin::Inline => write!(f, "inline"),
            CredentialOrigin::SecretStore { name } => write!(f, "secret-store:{}", name),
        }
    }
}

/// Service account key material tagged with its origin.
///
/// `Debug` never shows the material; logs use [`Credential::fingerprint`].
#[derive(Debug, Clone)]
pub struct Credential {
    material: SecretString,
    origin: CredentialOrigin,
}

impl Credential {
    pub fn new(material: SecretString, origin: CredentialOrigin) -> Self {
        Self { material, origin }
    }

    pub fn material(&self) -> &SecretString {
        &self.material
    }

    pub fn origin(&self) -> &CredentialOrigin {
        &self.origin
    }

    /// Short hash identifying the material without revealing it
    pub fn fingerprint(&self) -> String {
        fingerprint(self.material.expose_secret().as_bytes())
    }
}

/// Raw inputs the broker chooses a delivery mode from
#[derive(Debug, Clone, Default)]
pub struct CredentialInput {
    /// Service account key JSON, when supplied by the operator
    pub raw: Option<SecretString>,

    /// Secret Manager entry; its presence selects secret-store delivery
    pub secret_name: Option<String>,

    /// Additional workload environment entries
    pub env: BTreeMap<String, String>,
}
