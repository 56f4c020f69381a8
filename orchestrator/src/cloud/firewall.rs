//! Shared ingress rules for the fleet

use tracing::{debug, info};

use crate::cloud::provider::{ComputeProvider, FirewallRule};
use crate::errors::FleetError;
use crate::models::spec::DeploymentSpec;

pub const HTTP_RULE_NAME: &str = "fleet-allow-http-https";

/// The two rules every fleet depends on
pub fn required_rules(spec: &DeploymentSpec) -> Vec<FirewallRule> {
    vec![
        FirewallRule {
            name: HTTP_RULE_NAME.to_string(),
            network: "default".to_string(),
            tcp_ports: vec![80, 443],
            target_tags: vec!["http-server".to_string(), "https-server".to_string()],
            source_ranges: vec!["0.0.0.0/0".to_string()],
        },
        FirewallRule {
            name: spec.service_rule_name(),
            network: "default".to_string(),
            tcp_ports: vec![spec.service_port],
            target_tags: vec![spec.service_tag()],
            source_ranges: vec!["0.0.0.0/0".to_string()],
        },
    ]
}

/// Create missing rules; an existing rule with other settings is fatal.
///
/// Returns the names of the rules created by this call.
pub async fn ensure_firewall_rules(
    provider: &dyn ComputeProvider,
    spec: &DeploymentSpec,
) -> Result<Vec<String>, FleetError> {
    let mut created = Vec::new();

    for rule in required_rules(spec) {
        match provider.describe_firewall_rule(&rule.name).await? {
            Some(existing) => {
                if let Some(detail) = rule.conflict_with(&existing) {
                    return Err(FleetError::FirewallConflict {
                        rule: rule.name.clone(),
                        detail,
                    });
                }
                debug!("Firewall rule {} already present", rule.name);
            }
            None => {
                provider.create_firewall_rule(&rule).await?;
                info!("Created firewall rule {}", rule.name);
                created.push(rule.name.clone());
            }
        }
    }

    Ok(created)
}
