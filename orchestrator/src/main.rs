//! fleetdeploy - Entry Point
//!
//! Provisions a fleet of Compute Engine instances, waits for them to come up,
//! deploys a containerized workload on each and writes a manifest of the run.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use secrecy::SecretString;
use tracing::{error, info};

use fleetdeploy::app::options::{credential_input, AppOptions};
use fleetdeploy::app::run::run;
use fleetdeploy::authn::broker::CredentialDeliveryPayload;
use fleetdeploy::deploy::startup::render_startup_script;
use fleetdeploy::errors::FleetError;
use fleetdeploy::filesys::file::File;
use fleetdeploy::fleet::aggregator::render_summary;
use fleetdeploy::logs::{init_logging, LogLevel, LogOptions};
use fleetdeploy::models::spec::DeploymentSpec;
use fleetdeploy::remote::ssh::PASSPHRASE_ENV;
use fleetdeploy::storage::layout::StorageLayout;
use fleetdeploy::storage::settings::Settings;
use fleetdeploy::utils::version_info;

const CREDENTIALS_ENV: &str = "FLEET_CREDENTIALS_JSON";
const DEFAULT_CONFIG: &str = "fleet.json";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file
    let config_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let mut settings = match File::new(&config_path).read_json::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = apply_overrides(&mut settings, &cli_args) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    // Initialize logging
    let layout = StorageLayout::new(&settings.output_dir);
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        json_format: cli_args.contains_key("json-logs"),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let spec = match DeploymentSpec::from_settings(&settings) {
        Ok(spec) => spec,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli_args.contains_key("print-startup-script") {
        println!("{}", preview_startup_script(&spec, &settings));
        return ExitCode::SUCCESS;
    }

    let env_material = env::var(CREDENTIALS_ENV).ok().map(SecretString::from);
    let credential = match credential_input(&settings, env_material).await {
        Ok(credential) => credential,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut options = AppOptions::new(spec, credential);
    options.layout = layout;
    options.ssh_passphrase = env::var(PASSPHRASE_ENV).ok().map(SecretString::from);

    info!(
        "Running fleetdeploy {} ({}) for project {}",
        version.version, version.git_hash, options.spec.project_id
    );
    match run(options, await_shutdown_signal()).await {
        Ok(manifest) => {
            print!("{}", render_summary(&manifest));
            if manifest.succeeded() == manifest.attempted() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Err(FleetError::Cancelled) => {
            info!("Run cancelled");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("Fleet run failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn apply_overrides(
    settings: &mut Settings,
    cli_args: &HashMap<String, String>,
) -> Result<(), String> {
    if let Some(count) = cli_args.get("count") {
        settings.instance_count = count
            .parse()
            .map_err(|_| format!("Invalid --count: {}", count))?;
    }
    if let Some(prefix) = cli_args.get("prefix") {
        settings.name_prefix = prefix.clone();
    }
    if let Some(zone) = cli_args.get("zone") {
        settings.zone = zone.clone();
    }
    if let Some(secret_name) = cli_args.get("secret-name") {
        settings.credential.secret_name = Some(secret_name.clone());
    }
    if let Some(path) = cli_args.get("credential-file") {
        settings.credential.key_file = Some(PathBuf::from(path));
    }
    if let Some(level) = cli_args.get("log-level") {
        settings.log_level = level.parse::<LogLevel>()?;
    }
    Ok(())
}

fn preview_startup_script(spec: &DeploymentSpec, settings: &Settings) -> String {
    let payload = match &settings.credential.secret_name {
        Some(name) => CredentialDeliveryPayload::SecretReference {
            secret_name: name.clone(),
            project_id: spec.project_id.clone(),
            version: None,
        },
        None => CredentialDeliveryPayload::Inline {
            encoded: String::new(),
            fingerprint: String::new(),
        },
    };
    render_startup_script(spec, &payload)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, cancelling run...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, cancelling run...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, cancelling run...");
    }
}
