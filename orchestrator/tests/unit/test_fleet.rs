//! Fleet run tests against in-memory providers

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio_test::{assert_err, assert_ok};

use fleetdeploy::app::run::execute;
use fleetdeploy::authn::broker::{
    decode_inline, parse_credential, render_env_document, CredentialBroker, INLINE_METADATA_KEY,
    SECRET_NAME_METADATA_KEY,
};
use fleetdeploy::authn::credential::{CredentialInput, CredentialOrigin};
use fleetdeploy::authn::secret_store::{MemorySecretStore, SecretStore};
use fleetdeploy::cloud::firewall::HTTP_RULE_NAME;
use fleetdeploy::cloud::provider::FirewallRule;
use fleetdeploy::deploy::fsm::ReadinessPhase;
use fleetdeploy::deploy::provisioner::STARTUP_SCRIPT_KEY;
use fleetdeploy::errors::FleetError;
use fleetdeploy::fleet::orchestrator::FleetOrchestrator;
use fleetdeploy::models::manifest::{DeploymentManifest, ProvisionStatus};
use fleetdeploy::models::spec::DeploymentSpec;
use fleetdeploy::storage::layout::StorageLayout;

use crate::common::{
    counting_sleep, inline_input, spec, StubCompute, StubRemote, ROTATED_KEY_JSON, RUN_TS,
};

fn orchestrator(
    compute: &Arc<StubCompute>,
    remote: &Arc<StubRemote>,
    store: &Arc<MemorySecretStore>,
) -> FleetOrchestrator {
    let (sleep_fn, _) = counting_sleep();
    FleetOrchestrator::new(
        compute.clone(),
        remote.clone(),
        CredentialBroker::new(store.clone()),
    )
    .with_sleep_fn(sleep_fn)
    .with_run_timestamp(RUN_TS)
}

async fn run_fleet(
    compute: StubCompute,
    remote: StubRemote,
    spec: &DeploymentSpec,
) -> (Result<DeploymentManifest, FleetError>, Arc<StubCompute>, Arc<StubRemote>) {
    let compute = Arc::new(compute);
    let remote = Arc::new(remote);
    let store = Arc::new(MemorySecretStore::new());
    let result = orchestrator(&compute, &remote, &store)
        .run(spec, &inline_input())
        .await;
    (result, compute, remote)
}

#[tokio::test]
async fn test_end_to_end_two_instances() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    let compute = Arc::new(StubCompute::new());
    let remote = Arc::new(StubRemote::new());
    let store = Arc::new(MemorySecretStore::new());
    let spec = spec(2);

    let manifest = assert_ok!(
        execute(
            &orchestrator(&compute, &remote, &store),
            &spec,
            &inline_input(),
            &layout,
            std::future::pending::<()>(),
        )
        .await
    );

    assert_eq!(manifest.summary_line(), "2/2 instances succeeded");
    for (i, entry) in manifest.entries.iter().enumerate() {
        let ordinal = i as u32 + 1;
        assert_eq!(entry.ordinal, ordinal);
        assert_eq!(entry.instance.name, format!("bench-{}-{}", RUN_TS, ordinal));
        assert_eq!(entry.provisioning, ProvisionStatus::Created);
        // addresses arrive through readiness polling
        assert_eq!(entry.instance.external_ip, Some(format!("34.0.0.{}", ordinal)));
        assert_eq!(entry.result.artifact_count, 4);
        assert_eq!(entry.result.artifact_bytes, 2048);
        assert_eq!(entry.result.strategy.as_deref(), Some("image"));
        assert!(entry.readiness.as_ref().unwrap().is_ready());

        let commands = remote.commands_for(&entry.instance.name);
        assert!(commands.iter().any(|c| c == "docker --version"));
        assert!(commands.iter().any(|c| c.contains("docker pull 'gcr.io/remix/garment-api:v1'")));
    }

    // both firewall rules were created
    let rules = compute.firewall_rules.lock().unwrap();
    assert!(rules.contains_key(HTTP_RULE_NAME));
    assert!(rules.contains_key("fleet-allow-bench-5001"));
    drop(rules);

    assert!(layout.manifest_json_file(RUN_TS).exists().await);
    let env = layout.manifest_env_file(RUN_TS).read_string().await.unwrap();
    assert!(env.contains("FLEET_INSTANCE_2_NAME=bench-1700000000-2"));
}

#[tokio::test]
async fn test_names_are_unique_for_every_fleet_size() {
    for count in 1..=20 {
        let mut spec = spec(count);
        spec.run_workload_on_create = false;
        let (result, compute, _) = run_fleet(StubCompute::new(), StubRemote::new(), &spec).await;
        let manifest = result.unwrap();

        assert_eq!(manifest.entries.len(), count as usize);
        let names: HashSet<&str> = manifest
            .entries
            .iter()
            .map(|e| e.instance.name.as_str())
            .collect();
        assert_eq!(names.len(), count as usize);
        assert_eq!(compute.create_calls(), count as usize);
        assert_eq!(manifest.succeeded(), count as usize);
    }
}

#[tokio::test]
async fn test_existing_instance_is_not_recreated() {
    let spec = spec(2);
    let existing = spec.instance_name(RUN_TS, 1);
    let compute = StubCompute::new().with_instance(&existing, &spec.zone);

    let (result, compute, _) = run_fleet(compute, StubRemote::new(), &spec).await;
    let manifest = result.unwrap();

    assert_eq!(compute.create_calls(), 1);
    assert_eq!(
        manifest.entries[0].provisioning,
        ProvisionStatus::AlreadyExists {
            note: "skipped: already exists".to_string()
        }
    );
    assert_eq!(manifest.entries[0].instance.external_ip.as_deref(), Some("35.0.0.99"));
    assert_eq!(manifest.entries[1].provisioning, ProvisionStatus::Created);
    assert_eq!(manifest.attempted(), 2);
}

#[tokio::test]
async fn test_readiness_timeout_is_bounded() {
    let spec = spec(1);
    let compute = Arc::new(StubCompute::new().never_running());
    let remote = Arc::new(StubRemote::new());
    let (sleep_fn, sleeps) = counting_sleep();
    let orchestrator = FleetOrchestrator::new(
        compute.clone(),
        remote.clone(),
        CredentialBroker::new(Arc::new(MemorySecretStore::new())),
    )
    .with_sleep_fn(sleep_fn)
    .with_run_timestamp(RUN_TS);

    let manifest = orchestrator.run(&spec, &inline_input()).await.unwrap();
    let entry = &manifest.entries[0];
    let readiness = entry.readiness.as_ref().unwrap();

    assert_eq!(readiness.phase(), ReadinessPhase::TimedOut);
    assert_eq!(readiness.attempts(), 3);
    // no sleep after the final attempt
    assert_eq!(sleeps.load(Ordering::SeqCst), 2);
    assert!(!entry.result.success);
    assert!(remote.commands_for(&entry.instance.name).is_empty());
    assert_eq!(manifest.summary_line(), "0/1 instances succeeded");
}

#[tokio::test]
async fn test_source_redeploy_replaces_previous_sources() {
    let sources = tempfile::tempdir().unwrap();
    let mut spec = spec(1);
    spec.workload.image = None;
    spec.workload.source_dir = Some(sources.path().to_path_buf());
    // the instance survives from an earlier run with sources already uploaded
    let existing = spec.instance_name(RUN_TS, 1);
    let compute = StubCompute::new().with_instance(&existing, &spec.zone);

    let (result, _, remote) = run_fleet(compute, StubRemote::new(), &spec).await;
    let manifest = result.unwrap();
    assert!(manifest.entries[0].is_success());
    assert_eq!(manifest.entries[0].result.strategy.as_deref(), Some("source"));

    let commands = remote.commands_for(&existing);
    let position = |needle: &str| commands.iter().position(|c| c.contains(needle)).unwrap();
    let cleared = position("rm -rf \"$HOME/workload\"");
    let uploaded = position("upload ");
    let built = position("docker build");
    assert!(cleared < uploaded && uploaded < built, "{commands:?}");
    assert_eq!(remote.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_partial_failure_keeps_other_instances() {
    let spec = spec(3);
    let compute = StubCompute::new().with_quota_failure(2);
    let failing = spec.instance_name(RUN_TS, 3);
    let remote = StubRemote::new().failing_deploy_on(&failing);

    let (result, compute, _) = run_fleet(compute, remote, &spec).await;
    let manifest = result.unwrap();

    assert_eq!(compute.create_calls(), 3);
    assert_eq!(manifest.attempted(), 3);
    assert!(manifest.entries[0].is_success());

    let quota = &manifest.entries[1];
    assert!(quota.provisioning.is_failed());
    assert!(quota.readiness.is_none());
    assert!(quota.result.error.as_deref().unwrap().contains("Quota"));

    let deploy = &manifest.entries[2];
    assert!(deploy.is_ready());
    assert!(!deploy.result.success);
    assert!(deploy.result.error.as_deref().unwrap().contains("pull access denied"));

    assert_eq!(manifest.summary_line(), "1/3 instances succeeded");
    assert_eq!(manifest.live_instance_names().len(), 2);
}

#[tokio::test]
async fn test_missing_account_aborts_before_creation() {
    let (result, compute, _) =
        run_fleet(StubCompute::new().without_account(), StubRemote::new(), &spec(2)).await;
    assert!(matches!(result, Err(FleetError::AuthUnavailable(_))));
    assert_eq!(compute.create_calls(), 0);
}

#[tokio::test]
async fn test_firewall_conflict_aborts_before_creation() {
    let conflicting = FirewallRule {
        name: "fleet-allow-bench-5001".to_string(),
        network: "default".to_string(),
        tcp_ports: vec![8080],
        target_tags: vec!["bench-service".to_string()],
        source_ranges: vec!["0.0.0.0/0".to_string()],
    };
    let compute = StubCompute::new().with_firewall_rule(conflicting);

    let (result, compute, _) = run_fleet(compute, StubRemote::new(), &spec(2)).await;
    let err = assert_err!(result);
    assert!(matches!(err, FleetError::FirewallConflict { .. }));
    assert!(err.is_run_fatal());
    assert_eq!(compute.create_calls(), 0);
}

#[tokio::test]
async fn test_invalid_spec_is_rejected() {
    let mut spec = spec(1);
    spec.instance_count = 21;
    let (result, compute, _) = run_fleet(StubCompute::new(), StubRemote::new(), &spec).await;
    assert!(matches!(result, Err(FleetError::InvalidSpec(_))));
    assert_eq!(compute.create_calls(), 0);
}

#[tokio::test]
async fn test_inline_payload_round_trips_through_metadata() {
    let spec = spec(1);
    let (result, compute, _) = run_fleet(StubCompute::new(), StubRemote::new(), &spec).await;
    assert_ok!(result);

    let requests = compute.requests.lock().unwrap();
    let metadata = &requests[0].metadata;
    assert!(metadata.contains_key(STARTUP_SCRIPT_KEY));

    let decoded = decode_inline(metadata.get(INLINE_METADATA_KEY).unwrap()).unwrap();
    let input = inline_input();
    let credential = parse_credential(input.raw.as_ref().unwrap(), CredentialOrigin::Inline).unwrap();
    let expected = render_env_document(&credential, &input.env).unwrap();
    assert_eq!(decoded.expose_secret(), expected.expose_secret());
    assert!(decoded.expose_secret().ends_with("MODEL_VERSION=v3\n"));
}

#[tokio::test]
async fn test_secret_store_keeps_every_version() {
    let spec = spec(1);
    let compute = Arc::new(StubCompute::new());
    let remote = Arc::new(StubRemote::new());
    let store = Arc::new(MemorySecretStore::new());
    let input = CredentialInput {
        secret_name: Some("fleet-sa".to_string()),
        ..inline_input()
    };
    let rotated = CredentialInput {
        raw: Some(SecretString::from(ROTATED_KEY_JSON.to_string())),
        ..input.clone()
    };

    let first = orchestrator(&compute, &remote, &store);
    assert_ok!(first.run(&spec, &input).await);
    let second = orchestrator(&compute, &remote, &store).with_run_timestamp(RUN_TS + 60);
    assert_ok!(second.run(&spec, &rotated).await);

    assert_eq!(store.versions("fleet-sa").await.unwrap(), vec!["2", "1"]);
    let latest = store.access_latest("fleet-sa").await.unwrap().unwrap();
    let credential =
        parse_credential(rotated.raw.as_ref().unwrap(), CredentialOrigin::Inline).unwrap();
    let expected = render_env_document(&credential, &rotated.env).unwrap();
    assert_eq!(latest.expose_secret(), expected.expose_secret());
    assert!(latest.expose_secret().contains("fleet-rotated@remix-prod"));

    let requests = compute.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    for request in requests.iter() {
        assert_eq!(request.metadata.get(SECRET_NAME_METADATA_KEY).unwrap(), "fleet-sa");
        assert!(!request.metadata.contains_key(INLINE_METADATA_KEY));
    }
}

#[tokio::test]
async fn test_missing_credential_is_fatal() {
    let compute = Arc::new(StubCompute::new());
    let remote = Arc::new(StubRemote::new());
    let store = Arc::new(MemorySecretStore::new());
    let result = orchestrator(&compute, &remote, &store)
        .run(&spec(1), &CredentialInput::default())
        .await;
    assert!(matches!(result, Err(FleetError::MissingCredential(_))));
    assert_eq!(compute.create_calls(), 0);
}

#[tokio::test]
async fn test_cleanup_after_deletes_created_instances() {
    let mut spec = spec(3);
    spec.cleanup_after = true;
    let existing = spec.instance_name(RUN_TS, 3);
    let compute = StubCompute::new()
        .with_instance(&existing, &spec.zone)
        .with_quota_failure(2);

    let (result, compute, _) = run_fleet(compute, StubRemote::new(), &spec).await;
    let manifest = result.unwrap();

    assert!(manifest.cleaned_up);
    // only the instance this run created; not the failed or pre-existing ones
    assert_eq!(compute.deleted(), vec![spec.instance_name(RUN_TS, 1)]);
}

#[tokio::test]
async fn test_cleanup_last_created() {
    let spec = spec(2);
    let compute = Arc::new(StubCompute::new());
    let remote = Arc::new(StubRemote::new());
    let store = Arc::new(MemorySecretStore::new());
    let orchestrator = orchestrator(&compute, &remote, &store);

    assert_ok!(orchestrator.run(&spec, &inline_input()).await);
    let created = orchestrator.created_instances().await;
    assert_eq!(created.len(), 2);

    let deleted = orchestrator.cleanup_last_created().await.unwrap().unwrap();
    assert_eq!(deleted, created[1]);
    assert_eq!(compute.deleted(), vec![deleted]);
}

#[tokio::test]
async fn test_aborted_run_keeps_earlier_run_instances() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    let compute = Arc::new(StubCompute::new());
    let remote = Arc::new(StubRemote::new());
    let store = Arc::new(MemorySecretStore::new());
    let orchestrator = orchestrator(&compute, &remote, &store);
    let spec = spec(2);

    assert_ok!(
        execute(&orchestrator, &spec, &inline_input(), &layout, std::future::pending::<()>()).await
    );
    let result = execute(
        &orchestrator,
        &spec,
        &CredentialInput::default(),
        &layout,
        std::future::pending::<()>(),
    )
    .await;

    assert!(matches!(result, Err(FleetError::MissingCredential(_))));
    assert!(compute.deleted().is_empty());
    assert!(orchestrator.created_instances().await.is_empty());
    assert_eq!(compute.instances.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancellation_leaves_instances_running() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());
    let compute = Arc::new(StubCompute::new());
    let remote = Arc::new(StubRemote::new());
    let store = Arc::new(MemorySecretStore::new());

    let result = execute(
        &orchestrator(&compute, &remote, &store),
        &spec(2),
        &inline_input(),
        &layout,
        async {},
    )
    .await;

    assert!(matches!(result, Err(FleetError::Cancelled)));
    assert!(compute.deleted().is_empty());
    assert!(!layout.manifest_json_file(RUN_TS).exists().await);
}
