//! Fleet run entry

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::app::options::AppOptions;
use crate::authn::broker::CredentialBroker;
use crate::authn::credential::CredentialInput;
use crate::authn::secret_store::GcloudSecretStore;
use crate::cloud::compute::GcloudCompute;
use crate::cloud::gcloud::Gcloud;
use crate::deploy::health::HealthChecker;
use crate::errors::FleetError;
use crate::fleet::aggregator::persist;
use crate::fleet::orchestrator::FleetOrchestrator;
use crate::models::manifest::DeploymentManifest;
use crate::models::spec::DeploymentSpec;
use crate::remote::auth::{Authenticator, NoPassphrase, StaticPassphrase};
use crate::remote::ssh::GcloudSsh;
use crate::storage::layout::StorageLayout;

/// Run a fleet deployment against Google Cloud through `gcloud`
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send,
) -> Result<DeploymentManifest, FleetError> {
    info!("Initializing fleet run...");
    options.layout.setup().await?;

    let orchestrator = init_orchestrator(&options).await?;
    execute(
        &orchestrator,
        &options.spec,
        &options.credential,
        &options.layout,
        shutdown_signal,
    )
    .await
}

async fn init_orchestrator(options: &AppOptions) -> Result<FleetOrchestrator, FleetError> {
    let gcloud = Gcloud::new(&options.spec.project_id).with_binary(&options.gcloud_binary);
    let work_dir = options.layout.work_dir();

    let authenticator: Arc<dyn Authenticator> = match &options.ssh_passphrase {
        Some(passphrase) => Arc::new(StaticPassphrase::new(passphrase.clone())),
        None => Arc::new(NoPassphrase),
    };

    let provider = Arc::new(GcloudCompute::new(gcloud.clone(), work_dir.clone()));
    let remote = Arc::new(GcloudSsh::new(gcloud.clone(), authenticator, &work_dir).await?);
    let broker = CredentialBroker::new(Arc::new(GcloudSecretStore::new(gcloud)));

    let mut orchestrator = FleetOrchestrator::new(provider, remote, broker);
    if let Some(health) = &options.health {
        orchestrator = orchestrator.with_health_checker(HealthChecker::new(health.clone())?);
    }
    Ok(orchestrator)
}

/// Drive one run to completion, cancellation or abort.
///
/// On completion the manifest is persisted. An operator shutdown cancels the
/// run and leaves created instances running. Any other failure deletes the
/// most recently created instance.
pub async fn execute(
    orchestrator: &FleetOrchestrator,
    spec: &DeploymentSpec,
    credential: &CredentialInput,
    layout: &StorageLayout,
    shutdown_signal: impl Future<Output = ()> + Send,
) -> Result<DeploymentManifest, FleetError> {
    let result = tokio::select! {
        result = orchestrator.run(spec, credential) => result,
        _ = shutdown_signal => {
            let created = orchestrator.created_instances().await;
            if created.is_empty() {
                warn!("Run cancelled before any instance was created");
            } else {
                warn!(
                    "Run cancelled; leaving created instances running: {}",
                    created.join(", ")
                );
            }
            return Err(FleetError::Cancelled);
        }
    };

    match result {
        Ok(manifest) => {
            persist(&manifest, layout).await?;
            Ok(manifest)
        }
        Err(e) => {
            error!("Fleet run aborted: {}", e);
            match orchestrator.cleanup_last_created().await {
                Ok(Some(name)) => info!("Deleted instance {}", name),
                Ok(None) => {}
                Err(cleanup_err) => error!("Cleanup after abort failed: {}", cleanup_err),
            }
            Err(e)
        }
    }
}
