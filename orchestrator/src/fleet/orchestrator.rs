//! Fleet run coordination
//!
//! One run checks its preconditions once, then drives every instance through
//! its own task: create (capped by a semaphore), wait for readiness, deploy
//! the workload. A failure in one task is recorded in that instance's entry
//! and never stops the others.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::authn::broker::{CredentialBroker, CredentialDeliveryPayload};
use crate::authn::credential::CredentialInput;
use crate::cloud::firewall::ensure_firewall_rules;
use crate::cloud::provider::ComputeProvider;
use crate::deploy::health::HealthChecker;
use crate::deploy::provisioner::InstanceProvisioner;
use crate::deploy::readiness::wait_until_ready;
use crate::deploy::workload::WorkloadDeployer;
use crate::errors::FleetError;
use crate::fleet::aggregator::aggregate;
use crate::models::instance::InstanceHandle;
use crate::models::manifest::{DeploymentManifest, InstanceOutcome, ProvisionStatus, WorkloadResult};
use crate::models::spec::DeploymentSpec;
use crate::remote::RemoteExecutor;
use crate::utils::generate_uuid;

/// Sleep used between readiness attempts
pub type SleepFn = Arc<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

fn tokio_sleep() -> SleepFn {
    Arc::new(|duration| Box::pin(tokio::time::sleep(duration)))
}

/// Shared by every instance task of one run
struct RunContext {
    spec: DeploymentSpec,
    payload: CredentialDeliveryPayload,
    run_timestamp: i64,
    provider: Arc<dyn ComputeProvider>,
    remote: Arc<dyn RemoteExecutor>,
    provisioner: InstanceProvisioner,
    deployer: WorkloadDeployer,
    creation_permits: Semaphore,
    sleep_fn: SleepFn,
    created: Arc<Mutex<Vec<InstanceHandle>>>,
}

pub struct FleetOrchestrator {
    provider: Arc<dyn ComputeProvider>,
    remote: Arc<dyn RemoteExecutor>,
    broker: CredentialBroker,
    health: Option<HealthChecker>,
    sleep_fn: SleepFn,
    run_timestamp: Option<i64>,
    created: Arc<Mutex<Vec<InstanceHandle>>>,
}

impl FleetOrchestrator {
    pub fn new(
        provider: Arc<dyn ComputeProvider>,
        remote: Arc<dyn RemoteExecutor>,
        broker: CredentialBroker,
    ) -> Self {
        Self {
            provider,
            remote,
            broker,
            health: None,
            sleep_fn: tokio_sleep(),
            run_timestamp: None,
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Probe each deployed workload over HTTP
    pub fn with_health_checker(mut self, health: HealthChecker) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_sleep_fn(mut self, sleep_fn: SleepFn) -> Self {
        self.sleep_fn = sleep_fn;
        self
    }

    /// Fix the timestamp used in instance names instead of the current time
    pub fn with_run_timestamp(mut self, run_timestamp: i64) -> Self {
        self.run_timestamp = Some(run_timestamp);
        self
    }

    /// Execute a fleet run.
    ///
    /// Returns `Err` only for run-wide precondition failures. Every planned
    /// instance gets an entry in the returned manifest.
    pub async fn run(
        &self,
        spec: &DeploymentSpec,
        input: &CredentialInput,
    ) -> Result<DeploymentManifest, FleetError> {
        self.created.lock().await.clear();
        spec.validate()?;

        let account = match self.provider.active_account().await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return Err(FleetError::AuthUnavailable(
                    "no active gcloud account".to_string(),
                ));
            }
            Err(e) => return Err(FleetError::AuthUnavailable(e.to_string())),
        };
        info!("Authenticated as {}", account);

        let payload = self.broker.resolve(spec, input).await?;
        let created_rules = ensure_firewall_rules(self.provider.as_ref(), spec).await?;
        if !created_rules.is_empty() {
            info!("Created firewall rules: {}", created_rules.join(", "));
        }

        let run_timestamp = self.run_timestamp.unwrap_or_else(|| Utc::now().timestamp());
        let run_id = generate_uuid();

        let planned: Vec<InstanceHandle> = (1..=spec.instance_count)
            .map(|ordinal| {
                InstanceHandle::planned(spec.instance_name(run_timestamp, ordinal), &spec.zone, ordinal)
            })
            .collect();
        info!(
            "Starting fleet run {} ({} instance(s), {} concurrent creation(s))",
            run_timestamp,
            spec.instance_count,
            spec.effective_creation_concurrency()
        );

        let context = Arc::new(RunContext {
            spec: spec.clone(),
            payload,
            run_timestamp,
            provider: self.provider.clone(),
            remote: self.remote.clone(),
            provisioner: InstanceProvisioner::new(self.provider.clone()),
            deployer: WorkloadDeployer::new(
                self.remote.clone(),
                self.health.clone(),
                spec.remote_command_timeout,
            ),
            creation_permits: Semaphore::new(spec.effective_creation_concurrency()),
            sleep_fn: self.sleep_fn.clone(),
            created: self.created.clone(),
        });

        let outcomes = run_instances(context, &planned).await;
        let mut manifest = aggregate(&planned, outcomes, spec, &run_id, run_timestamp, Utc::now());
        info!("{}", manifest.summary_line());

        if spec.cleanup_after {
            manifest.cleaned_up = self.cleanup(&manifest).await;
        }
        Ok(manifest)
    }

    /// Names of the instances created so far by the current run
    pub async fn created_instances(&self) -> Vec<String> {
        self.created
            .lock()
            .await
            .iter()
            .map(|h| h.name.clone())
            .collect()
    }

    /// Delete the most recently created instance of the current run.
    ///
    /// Meant for runs that abort before completing. Returns the deleted name.
    pub async fn cleanup_last_created(&self) -> Result<Option<String>, FleetError> {
        let last = self.created.lock().await.pop();
        match last {
            Some(handle) => {
                warn!("Deleting instance {} left by the aborted run", handle.name);
                self.provider.delete_instance(&handle.name, &handle.zone).await?;
                Ok(Some(handle.name))
            }
            None => Ok(None),
        }
    }

    /// Delete every instance created by the run; true when all deletions succeed
    async fn cleanup(&self, manifest: &DeploymentManifest) -> bool {
        let targets: Vec<&InstanceHandle> = manifest
            .entries
            .iter()
            .filter(|e| e.provisioning == ProvisionStatus::Created)
            .map(|e| &e.instance)
            .collect();
        info!("Cleaning up {} instance(s)", targets.len());

        let results = join_all(
            targets
                .iter()
                .map(|handle| self.provider.delete_instance(&handle.name, &handle.zone)),
        )
        .await;

        let mut all_deleted = true;
        for (handle, result) in targets.iter().zip(results) {
            if let Err(e) = result {
                error!("Failed to delete {}: {}", handle.name, e);
                all_deleted = false;
            }
        }
        if all_deleted {
            self.created.lock().await.clear();
        }
        all_deleted
    }
}

/// Spawn one task per planned instance and collect every outcome.
///
/// A panicking task yields a failed outcome for its instance. Dropping the
/// returned future aborts the tasks that are still running.
async fn run_instances(context: Arc<RunContext>, planned: &[InstanceHandle]) -> Vec<InstanceOutcome> {
    let mut tasks = JoinSet::new();

    for handle in planned {
        let task_context = context.clone();
        let task_handle = handle.clone();
        tasks.spawn(async move {
            let fallback = task_handle.clone();
            match AssertUnwindSafe(run_instance(task_context, task_handle))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!("[{}] instance task panicked", fallback.name);
                    InstanceOutcome::provisioning_failed(fallback, "instance task panicked")
                }
            }
        });
    }

    let mut outcomes = Vec::with_capacity(planned.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!("Instance task failed: {}", e),
        }
    }
    outcomes
}

async fn run_instance(context: Arc<RunContext>, planned: InstanceHandle) -> InstanceOutcome {
    let spec = &context.spec;

    let provisioned = {
        let _permit = match context.creation_permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return InstanceOutcome::provisioning_failed(planned, e.to_string()),
        };
        match context
            .provisioner
            .create(spec, planned.ordinal, &context.payload, context.run_timestamp)
            .await
        {
            Ok(provisioned) => provisioned,
            Err(e) => {
                error!("[{}] creation failed: {}", planned.name, e);
                return InstanceOutcome::provisioning_failed(planned, e.to_string());
            }
        }
    };
    if provisioned.status == ProvisionStatus::Created {
        context.created.lock().await.push(provisioned.handle.clone());
    }

    let mut handle = provisioned.handle;
    let sleep_fn = context.sleep_fn.clone();
    let readiness = wait_until_ready(
        context.provider.as_ref(),
        context.remote.as_ref(),
        &mut handle,
        &spec.readiness,
        |duration| sleep_fn(duration),
    )
    .await;

    let result = if !readiness.is_ready() {
        WorkloadResult::failed(format!(
            "not ready after {} attempt(s), last phase {}",
            readiness.attempts(),
            readiness.phase()
        ))
    } else if !spec.run_workload_on_create {
        WorkloadResult::not_requested()
    } else {
        context.deployer.deploy(&handle, &spec.workload).await
    };

    InstanceOutcome {
        handle,
        provisioning: provisioned.status,
        readiness: Some(readiness),
        result,
    }
}
