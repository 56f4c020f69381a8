//! Readiness FSM tests

use fleetdeploy::deploy::fsm::{ReadinessEvent, ReadinessPhase, ReadinessState};
use fleetdeploy::models::instance::PowerState;

#[test]
fn test_fsm_initial_state() {
    let fsm = ReadinessState::new();
    assert_eq!(fsm.phase(), ReadinessPhase::Pending);
    assert_eq!(fsm.attempts(), 0);
    assert!(fsm.last_power_state().is_none());
    assert!(fsm.last_liveness().is_none());
    assert!(!fsm.is_terminal());
}

#[test]
fn test_fsm_ready_flow() {
    let mut fsm = ReadinessState::new();

    fsm.process(ReadinessEvent::Begin).unwrap();
    fsm.record_attempt();
    fsm.process(ReadinessEvent::PowerObserved(PowerState::Running)).unwrap();
    assert_eq!(fsm.phase(), ReadinessPhase::LivenessWait);

    fsm.process(ReadinessEvent::LivenessObserved(true)).unwrap();
    assert!(fsm.is_ready());
    assert_eq!(fsm.attempts(), 1);
    assert_eq!(fsm.last_power_state(), Some(PowerState::Running));
    assert_eq!(fsm.last_liveness(), Some(true));
}

#[test]
fn test_fsm_stopped_instance_resets_liveness() {
    let mut fsm = ReadinessState::new();

    fsm.process(ReadinessEvent::Begin).unwrap();
    fsm.process(ReadinessEvent::PowerObserved(PowerState::Running)).unwrap();
    fsm.process(ReadinessEvent::LivenessObserved(false)).unwrap();
    assert_eq!(fsm.last_liveness(), Some(false));

    // LivenessWait -> PowerWait
    fsm.process(ReadinessEvent::PowerObserved(PowerState::Stopped)).unwrap();
    assert_eq!(fsm.phase(), ReadinessPhase::PowerWait);
    assert!(fsm.last_liveness().is_none());
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = ReadinessState::new();

    // Liveness cannot be observed before the instance runs
    assert!(fsm.process(ReadinessEvent::LivenessObserved(true)).is_err());
    fsm.process(ReadinessEvent::Begin).unwrap();
    assert!(fsm.process(ReadinessEvent::LivenessObserved(true)).is_err());
    assert!(fsm.process(ReadinessEvent::Begin).is_err());
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut fsm = ReadinessState::new();
    fsm.process(ReadinessEvent::Begin).unwrap();
    fsm.process(ReadinessEvent::PowerObserved(PowerState::Running)).unwrap();
    fsm.process(ReadinessEvent::LivenessObserved(true)).unwrap();

    assert!(fsm.process(ReadinessEvent::AttemptsExhausted).is_err());
    assert!(fsm.process(ReadinessEvent::PowerObserved(PowerState::Stopped)).is_err());
    assert_eq!(fsm.phase(), ReadinessPhase::Ready);
}

#[test]
fn test_fsm_serializes_phase() {
    let mut fsm = ReadinessState::new();
    fsm.process(ReadinessEvent::Begin).unwrap();
    fsm.process(ReadinessEvent::AttemptsExhausted).unwrap();

    let json = serde_json::to_value(&fsm).unwrap();
    assert_eq!(json["phase"], "TIMED_OUT");

    let back: ReadinessState = serde_json::from_value(json).unwrap();
    assert_eq!(back, fsm);
}
