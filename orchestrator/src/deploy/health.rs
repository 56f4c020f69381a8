//! HTTP health probe for deployed workloads

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::errors::FleetError;

/// Health probe options
#[derive(Debug, Clone)]
pub struct HealthOptions {
    pub attempts: u32,
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            attempts: 6,
            interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Polls a workload's health endpoint
#[derive(Clone)]
pub struct HealthChecker {
    client: Client,
    options: HealthOptions,
}

impl HealthChecker {
    pub fn new(options: HealthOptions) -> Result<Self, FleetError> {
        let client = Client::builder().timeout(options.request_timeout).build()?;
        Ok(Self { client, options })
    }

    /// True once the endpoint answers with a success status.
    ///
    /// Gives up after the configured attempts; connection errors count as
    /// failed attempts.
    pub async fn check(&self, url: &str) -> bool {
        for attempt in 1..=self.options.attempts {
            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("GET {} -> {} (attempt {})", url, response.status(), attempt);
                    return true;
                }
                Ok(response) => {
                    debug!("GET {} -> {} (attempt {})", url, response.status(), attempt);
                }
                Err(e) => {
                    debug!("GET {} failed (attempt {}): {}", url, attempt, e);
                }
            }
            if attempt < self.options.attempts {
                tokio::time::sleep(self.options.interval).await;
            }
        }
        false
    }
}

/// `http://{ip}:{port}{path}`, adding the leading slash if missing
pub fn health_url(ip: &str, port: u16, path: &str) -> String {
    if path.starts_with('/') {
        format!("http://{}:{}{}", ip, port, path)
    } else {
        format!("http://{}:{}/{}", ip, port, path)
    }
}
