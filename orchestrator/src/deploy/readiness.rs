//! Readiness polling

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cloud::provider::ComputeProvider;
use crate::deploy::fsm::{ReadinessEvent, ReadinessPhase, ReadinessState};
use crate::models::instance::{InstanceHandle, PowerState};
use crate::models::spec::ReadinessOptions;
use crate::remote::RemoteExecutor;

/// Upper bound for a single liveness probe
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(60);

fn apply(state: &mut ReadinessState, event: ReadinessEvent, name: &str) {
    if let Err(e) = state.process(event) {
        warn!("[{}] {}", name, e);
    }
}

/// Poll until the instance is running and its liveness command succeeds.
///
/// Makes at most `options.max_attempts` attempts and sleeps between them,
/// never after the last one. The handle's addresses and power state are
/// refreshed from every describe. Describe and probe failures only cost an
/// attempt. Running out of attempts yields a `TimedOut` state.
pub async fn wait_until_ready<S, F>(
    provider: &dyn ComputeProvider,
    remote: &dyn RemoteExecutor,
    handle: &mut InstanceHandle,
    options: &ReadinessOptions,
    sleep_fn: S,
) -> ReadinessState
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let mut state = ReadinessState::new();
    apply(&mut state, ReadinessEvent::Begin, &handle.name);

    for attempt in 0..options.max_attempts {
        state.record_attempt();

        match provider.describe_instance(&handle.name, &handle.zone).await {
            Ok(Some(status)) => {
                handle.refresh(&status);
                apply(&mut state, ReadinessEvent::PowerObserved(status.power_state), &handle.name);
            }
            Ok(None) => {
                handle.power_state = PowerState::Deleted;
                apply(&mut state, ReadinessEvent::PowerObserved(PowerState::Deleted), &handle.name);
            }
            Err(e) => {
                warn!("[{}] describe failed (attempt {}): {}", handle.name, attempt + 1, e);
            }
        }

        if state.phase() == ReadinessPhase::LivenessWait {
            let alive = match remote
                .execute(handle, &options.liveness_command, LIVENESS_TIMEOUT)
                .await
            {
                Ok(output) => {
                    if !output.success() {
                        debug!("[{}] liveness probe failed: {}", handle.name, output.error_message());
                    }
                    output.success()
                }
                Err(e) => {
                    debug!("[{}] liveness probe error: {}", handle.name, e);
                    false
                }
            };
            apply(&mut state, ReadinessEvent::LivenessObserved(alive), &handle.name);
        }

        if state.is_ready() {
            info!("[{}] ready after {} attempt(s)", handle.name, state.attempts());
            return state;
        }

        debug!(
            "[{}] not ready (attempt {}/{}, phase {})",
            handle.name,
            attempt + 1,
            options.max_attempts,
            state.phase()
        );
        if attempt + 1 < options.max_attempts {
            sleep_fn(options.delay_after(attempt)).await;
        }
    }

    apply(&mut state, ReadinessEvent::AttemptsExhausted, &handle.name);
    warn!(
        "[{}] not ready after {} attempts (last power state {:?})",
        handle.name,
        state.attempts(),
        state.last_power_state()
    );
    state
}
