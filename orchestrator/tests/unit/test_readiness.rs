//! Readiness polling tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fleetdeploy::deploy::fsm::ReadinessPhase;
use fleetdeploy::deploy::readiness::wait_until_ready;
use fleetdeploy::models::instance::{InstanceHandle, PowerState};
use fleetdeploy::models::spec::ReadinessOptions;

use crate::common::{StubCompute, StubRemote};

fn options(max_attempts: u32) -> ReadinessOptions {
    ReadinessOptions {
        max_attempts,
        interval: Duration::from_secs(2),
        backoff_multiplier: 2.0,
        max_interval: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_running_instance_is_ready_on_first_attempt() {
    let compute = StubCompute::new().with_instance("bench-1-1", "europe-west1-b");
    let remote = StubRemote::new();
    let mut handle = InstanceHandle::planned("bench-1-1", "europe-west1-b", 1);
    let sleeps = AtomicUsize::new(0);

    let state = wait_until_ready(&compute, &remote, &mut handle, &options(5), |_| {
        sleeps.fetch_add(1, Ordering::SeqCst);
        async {}
    })
    .await;

    assert!(state.is_ready());
    assert_eq!(state.attempts(), 1);
    assert_eq!(sleeps.load(Ordering::SeqCst), 0);
    assert_eq!(handle.power_state, PowerState::Running);
    assert_eq!(handle.external_ip.as_deref(), Some("35.0.0.99"));
    assert_eq!(remote.commands_for("bench-1-1"), vec!["docker --version".to_string()]);
}

#[tokio::test]
async fn test_missing_instance_times_out_with_backoff() {
    let compute = StubCompute::new();
    let remote = StubRemote::new();
    let mut handle = InstanceHandle::planned("bench-1-1", "europe-west1-b", 1);
    let delays = std::sync::Mutex::new(Vec::new());

    let state = wait_until_ready(&compute, &remote, &mut handle, &options(4), |delay| {
        delays.lock().unwrap().push(delay);
        async {}
    })
    .await;

    assert_eq!(state.phase(), ReadinessPhase::TimedOut);
    assert_eq!(state.attempts(), 4);
    assert_eq!(state.last_power_state(), Some(PowerState::Deleted));
    assert_eq!(compute.describe_calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        *delays.lock().unwrap(),
        vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(5)]
    );
    assert!(remote.commands_for("bench-1-1").is_empty());
}

#[tokio::test]
async fn test_running_instance_with_failing_liveness_times_out() {
    let compute = StubCompute::new().with_instance("bench-1-1", "europe-west1-b");
    let remote = StubRemote::new().failing_liveness();
    let mut handle = InstanceHandle::planned("bench-1-1", "europe-west1-b", 1);

    let state = wait_until_ready(&compute, &remote, &mut handle, &options(3), |_| async {}).await;

    assert_eq!(state.phase(), ReadinessPhase::TimedOut);
    assert_eq!(state.attempts(), 3);
    assert_eq!(state.last_power_state(), Some(PowerState::Running));
    // one probe per attempt
    assert_eq!(remote.commands_for("bench-1-1").len(), 3);
}

#[tokio::test]
async fn test_unreachable_channel_is_transient() {
    let compute = StubCompute::new().with_instance("bench-1-1", "europe-west1-b");
    let remote = StubRemote::new().unreachable_for(2);
    let mut handle = InstanceHandle::planned("bench-1-1", "europe-west1-b", 1);

    let state = wait_until_ready(&compute, &remote, &mut handle, &options(5), |_| async {}).await;

    assert!(state.is_ready());
    assert_eq!(state.attempts(), 3);
    assert_eq!(remote.commands_for("bench-1-1").len(), 3);
}
