//! Error types for the fleet orchestrator

use std::time::Duration;

use thiserror::Error;

/// Main error type for the fleet orchestrator
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid deployment spec: {0}")]
    InvalidSpec(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Credential payload is {size} bytes, metadata limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Cloud authentication unavailable: {0}")]
    AuthUnavailable(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Invalid machine shape: {0}")]
    InvalidMachineShape(String),

    #[error("Network setup failure: {0}")]
    NetworkSetupFailure(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Firewall rule {rule} exists with incompatible settings: {detail}")]
    FirewallConflict { rule: String, detail: String },

    #[error("Secret store error: {0}")]
    SecretStoreError(String),

    #[error("Remote execution error: {0}")]
    RemoteError(String),

    #[error("Remote command timed out after {timeout:?}: {command}")]
    RemoteTimeout { command: String, timeout: Duration },

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Errors that abort the whole run before or instead of per-instance work.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            FleetError::ConfigError(_)
                | FleetError::InvalidSpec(_)
                | FleetError::MissingCredential(_)
                | FleetError::InvalidCredential(_)
                | FleetError::EncodingError(_)
                | FleetError::PayloadTooLarge { .. }
                | FleetError::AuthUnavailable(_)
                | FleetError::FirewallConflict { .. }
                | FleetError::SecretStoreError(_)
                | FleetError::Cancelled
        )
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Internal(err.to_string())
    }
}
