//! Instance provisioning tests

use std::sync::Arc;

use fleetdeploy::authn::broker::CredentialDeliveryPayload;
use fleetdeploy::deploy::provisioner::InstanceProvisioner;
use fleetdeploy::models::manifest::ProvisionStatus;

use crate::common::{spec, StubCompute, RUN_TS};

fn payload() -> CredentialDeliveryPayload {
    CredentialDeliveryPayload::Inline {
        encoded: "e30K".to_string(),
        fingerprint: "44136fa355b3678a".to_string(),
    }
}

#[tokio::test]
async fn test_create_twice_reuses_the_instance() {
    let spec = spec(1);
    let compute = Arc::new(StubCompute::new());
    let provisioner = InstanceProvisioner::new(compute.clone());

    let first = provisioner.create(&spec, 1, &payload(), RUN_TS).await.unwrap();
    let second = provisioner.create(&spec, 1, &payload(), RUN_TS).await.unwrap();

    assert_eq!(compute.create_calls(), 1);
    assert_eq!(first.status, ProvisionStatus::Created);
    assert_eq!(second.status, ProvisionStatus::already_exists());
    assert_eq!(first.handle.name, second.handle.name);
    assert_eq!(first.handle.zone, second.handle.zone);
    assert_eq!(first.handle.ordinal, second.handle.ordinal);
    assert_eq!(second.handle.name, format!("bench-{}-1", RUN_TS));
}

#[tokio::test]
async fn test_failed_create_is_retried_on_next_call() {
    let spec = spec(1);
    let compute = Arc::new(StubCompute::new().with_quota_failure(1));
    let provisioner = InstanceProvisioner::new(compute.clone());

    assert!(provisioner.create(&spec, 1, &payload(), RUN_TS).await.is_err());
    assert!(provisioner.create(&spec, 1, &payload(), RUN_TS).await.is_err());
    // nothing was left behind, so both calls reached create
    assert_eq!(compute.create_calls(), 2);
}
