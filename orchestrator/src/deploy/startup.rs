//! Instance boot script
//!
//! The script runs as root on first boot. It materializes the workload
//! environment from the credential payload, installs Docker and optionally
//! starts the workload container.

use std::fmt::Write;

use crate::authn::broker::{
    CredentialDeliveryPayload, INLINE_METADATA_KEY, PROJECT_METADATA_KEY, SECRET_NAME_METADATA_KEY,
};
use crate::deploy::docker::DockerCommands;
use crate::models::spec::DeploymentSpec;
use crate::utils::shell_quote;

const METADATA_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/attributes";

const HEADER: &str = r#"#!/bin/bash
set -euo pipefail
"#;

const INSTALL_DOCKER: &str = r#"
if ! command -v docker >/dev/null 2>&1; then
  curl -fsSL https://get.docker.com | sh
fi
systemctl enable --now docker
"#;

/// Render the `startup-script` metadata value for a run
pub fn render_startup_script(spec: &DeploymentSpec, payload: &CredentialDeliveryPayload) -> String {
    let env_file = shell_quote(&spec.workload.env_file);
    let mut script = String::from(HEADER);

    let _ = writeln!(script, "METADATA={}", METADATA_URL);
    let _ = writeln!(script, "ENV_FILE={}", env_file);
    script.push_str("attr() { curl -sf -H 'Metadata-Flavor: Google' \"$METADATA/$1\"; }\n");
    script.push_str("umask 077\nmkdir -p \"$(dirname \"$ENV_FILE\")\"\n");

    match payload {
        CredentialDeliveryPayload::Inline { .. } => {
            let _ = writeln!(
                script,
                "attr {} | base64 -d > \"$ENV_FILE\"",
                INLINE_METADATA_KEY
            );
        }
        CredentialDeliveryPayload::SecretReference { .. } => {
            let _ = writeln!(script, "SECRET_NAME=$(attr {})", SECRET_NAME_METADATA_KEY);
            let _ = writeln!(script, "PROJECT_ID=$(attr {})", PROJECT_METADATA_KEY);
            script.push_str(
                "gcloud secrets versions access latest --secret=\"$SECRET_NAME\" \
                 --project=\"$PROJECT_ID\" > \"$ENV_FILE\"\n",
            );
        }
    }
    script.push_str("chmod 600 \"$ENV_FILE\"\n");
    script.push_str(INSTALL_DOCKER);

    if spec.boot_workload {
        if let Some(image) = &spec.workload.image {
            let docker = DockerCommands::new(&spec.workload).as_root();
            script.push('\n');
            script.push_str(&docker.pull_and_run(image));
            script.push('\n');
        }
    }
    script
}
