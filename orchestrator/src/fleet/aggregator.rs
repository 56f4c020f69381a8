//! Fleet results aggregation and reporting

use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use colored::Colorize;
use tracing::info;

use crate::cloud::firewall::required_rules;
use crate::errors::FleetError;
use crate::filesys::file::File;
use crate::models::instance::InstanceHandle;
use crate::models::manifest::{DeploymentManifest, InstanceOutcome, ManifestEntry};
use crate::models::spec::DeploymentSpec;
use crate::storage::layout::StorageLayout;

/// Combine per-instance outcomes into a manifest.
///
/// Outcomes are matched to the planned handles by instance name. A handle
/// without an outcome becomes a failed entry, so the manifest always has
/// one entry per planned instance, in ordinal order.
pub fn aggregate(
    handles: &[InstanceHandle],
    outcomes: Vec<InstanceOutcome>,
    spec: &DeploymentSpec,
    run_id: &str,
    run_timestamp: i64,
    generated_at: DateTime<Utc>,
) -> DeploymentManifest {
    let mut by_name: HashMap<String, InstanceOutcome> = outcomes
        .into_iter()
        .map(|outcome| (outcome.handle.name.clone(), outcome))
        .collect();

    let mut entries: Vec<ManifestEntry> = handles
        .iter()
        .map(|planned| {
            let outcome = by_name.remove(&planned.name).unwrap_or_else(|| {
                InstanceOutcome::provisioning_failed(planned.clone(), "no result recorded")
            });
            ManifestEntry {
                ordinal: planned.ordinal,
                instance: outcome.handle,
                provisioning: outcome.provisioning,
                readiness: outcome.readiness,
                result: outcome.result,
            }
        })
        .collect();
    entries.sort_by_key(|e| e.ordinal);

    DeploymentManifest {
        run_id: run_id.to_string(),
        run_timestamp,
        generated_at,
        spec: spec.clone(),
        entries,
        cleaned_up: false,
    }
}

fn addresses(entry: &ManifestEntry) -> String {
    format!(
        "external {} internal {}",
        entry.instance.external_ip.as_deref().unwrap_or("-"),
        entry.instance.internal_ip.as_deref().unwrap_or("-")
    )
}

/// Human readable report, one line per instance plus the totals
pub fn render_summary(manifest: &DeploymentManifest) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        format!("Fleet run {} ({})", manifest.run_timestamp, manifest.run_id).bold()
    );

    for entry in &manifest.entries {
        let ready = if entry.is_ready() {
            "ready".green()
        } else {
            "not ready".red()
        };
        let deployed = if entry.result.not_requested {
            "no workload".normal()
        } else if entry.result.success {
            "deployed".green()
        } else {
            "failed".red()
        };

        let mut line = format!("  [{}] {}  {}  {}", entry.ordinal, entry.instance.name, ready, deployed);
        if manifest.spec.show_ip_addresses {
            let _ = write!(line, "  {}", addresses(entry));
        }
        if entry.result.success && !entry.result.not_requested {
            let _ = write!(
                line,
                "  artifacts: {} files, {} bytes",
                entry.result.artifact_count, entry.result.artifact_bytes
            );
        }
        match entry.result.healthy {
            Some(true) => line.push_str("  health: ok"),
            Some(false) => line.push_str("  health: failing"),
            None => {}
        }
        if let Some(error) = &entry.result.error {
            let _ = write!(line, "  ({})", error.dimmed());
        }
        let _ = writeln!(out, "{}", line);
    }

    let summary = manifest.summary_line();
    let summary = if manifest.succeeded() == manifest.attempted() {
        summary.green().bold()
    } else {
        summary.yellow().bold()
    };
    let _ = writeln!(out, "{}", summary);
    if manifest.cleaned_up {
        let _ = writeln!(out, "Instances created by this run were deleted");
    }
    out
}

/// Key/value record of the run with teardown commands
pub fn render_env_manifest(manifest: &DeploymentManifest) -> String {
    let spec = &manifest.spec;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# fleetdeploy run {} generated {}",
        manifest.run_id,
        manifest.generated_at.to_rfc3339()
    );
    let _ = writeln!(out, "FLEET_RUN_TIMESTAMP={}", manifest.run_timestamp);
    let _ = writeln!(out, "FLEET_PROJECT_ID={}", spec.project_id);
    let _ = writeln!(out, "FLEET_ZONE={}", spec.zone);
    let _ = writeln!(out, "FLEET_MACHINE_TYPE={}", spec.machine_type);
    let _ = writeln!(out, "FLEET_INSTANCE_COUNT={}", manifest.attempted());
    let _ = writeln!(out, "FLEET_SUCCEEDED={}", manifest.succeeded());

    for entry in &manifest.entries {
        let prefix = format!("FLEET_INSTANCE_{}", entry.ordinal);
        let _ = writeln!(out, "{}_NAME={}", prefix, entry.instance.name);
        let _ = writeln!(
            out,
            "{}_EXTERNAL_IP={}",
            prefix,
            entry.instance.external_ip.as_deref().unwrap_or("")
        );
        let _ = writeln!(
            out,
            "{}_INTERNAL_IP={}",
            prefix,
            entry.instance.internal_ip.as_deref().unwrap_or("")
        );
        let status = if entry.is_success() { "success" } else { "failed" };
        let _ = writeln!(out, "{}_STATUS={}", prefix, status);
    }

    let live = manifest.live_instance_names();
    out.push_str("\n# Teardown\n");
    if live.is_empty() {
        out.push_str("# no instances left to delete\n");
    } else {
        let _ = writeln!(
            out,
            "# gcloud compute instances delete {} --zone={} --project={} --quiet",
            live.join(" "),
            spec.zone,
            spec.project_id
        );
    }
    for rule in required_rules(spec) {
        let _ = writeln!(
            out,
            "# gcloud compute firewall-rules delete {} --project={} --quiet",
            rule.name, spec.project_id
        );
    }
    out
}

/// Write the JSON and key/value manifests; returns the JSON file
pub async fn persist(
    manifest: &DeploymentManifest,
    layout: &StorageLayout,
) -> Result<File, FleetError> {
    let json_file = layout.manifest_json_file(manifest.run_timestamp);
    json_file.write_json(manifest).await?;

    let env_file = layout.manifest_env_file(manifest.run_timestamp);
    env_file.write_string(&render_env_manifest(manifest)).await?;

    info!(
        "Manifest written to {} and {}",
        json_file.path().display(),
        env_file.path().display()
    );
    Ok(json_file)
}
