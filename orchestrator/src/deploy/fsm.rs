//! Finite State Machine for instance readiness

use serde::{Deserialize, Serialize};

use crate::models::instance::PowerState;

/// Readiness phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadinessPhase {
    /// Polling has not started
    Pending,

    /// Waiting for the instance to report RUNNING
    PowerWait,

    /// Running, waiting for the container runtime to answer
    LivenessWait,

    /// Running and the liveness probe succeeded
    Ready,

    /// Attempts exhausted before readiness
    TimedOut,
}

impl ReadinessPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadinessPhase::Ready | ReadinessPhase::TimedOut)
    }
}

impl std::fmt::Display for ReadinessPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReadinessPhase::Pending => "PENDING",
            ReadinessPhase::PowerWait => "POWER_WAIT",
            ReadinessPhase::LivenessWait => "LIVENESS_WAIT",
            ReadinessPhase::Ready => "READY",
            ReadinessPhase::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Readiness event
#[derive(Debug, Clone)]
pub enum ReadinessEvent {
    /// Start polling
    Begin,

    /// A describe call reported this power state
    PowerObserved(PowerState),

    /// The liveness probe finished
    LivenessObserved(bool),

    /// No attempts left
    AttemptsExhausted,
}

/// Readiness state of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessState {
    phase: ReadinessPhase,
    attempts: u32,
    last_power_state: Option<PowerState>,
    last_liveness: Option<bool>,
}

impl ReadinessState {
    /// Create a new state machine in pending phase
    pub fn new() -> Self {
        Self {
            phase: ReadinessPhase::Pending,
            attempts: 0,
            last_power_state: None,
            last_liveness: None,
        }
    }

    pub fn phase(&self) -> ReadinessPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_power_state(&self) -> Option<PowerState> {
        self.last_power_state
    }

    pub fn last_liveness(&self) -> Option<bool> {
        self.last_liveness
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_ready(&self) -> bool {
        self.phase == ReadinessPhase::Ready
    }

    /// Count one polling attempt
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: ReadinessEvent) -> Result<(), String> {
        let new_phase = match (&self.phase, &event) {
            (ReadinessPhase::Pending, ReadinessEvent::Begin) => ReadinessPhase::PowerWait,

            (ReadinessPhase::PowerWait | ReadinessPhase::LivenessWait, ReadinessEvent::PowerObserved(state)) => {
                self.last_power_state = Some(*state);
                if state.is_running() {
                    ReadinessPhase::LivenessWait
                } else {
                    // A stopped instance has to pass the liveness probe again
                    self.last_liveness = None;
                    ReadinessPhase::PowerWait
                }
            }

            (ReadinessPhase::LivenessWait, ReadinessEvent::LivenessObserved(alive)) => {
                self.last_liveness = Some(*alive);
                if *alive {
                    ReadinessPhase::Ready
                } else {
                    ReadinessPhase::LivenessWait
                }
            }

            (phase, ReadinessEvent::AttemptsExhausted) if !phase.is_terminal() => {
                ReadinessPhase::TimedOut
            }

            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        self.phase = new_phase;
        Ok(())
    }
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::new()
    }
}
