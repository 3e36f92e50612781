//! Scheduler tick integration for async hosts.
//!
//! The bridge itself is synchronous; these helpers call [`Bridge::pump`] from a
//! tokio interval and feed it outbound requests from a channel. Missed ticks are
//! skipped, never bunched, so a stalled host does not burst-pump afterwards.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::HostRequest;
use crate::host::HostEventSink;
use crate::orchestrator::Bridge;
use crate::state::BridgeState;

const MIN_TICK: Duration = Duration::from_millis(1);

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(MIN_TICK));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Why [`wait_ready`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum ReadyError {
    #[error("child did not become ready within {0:?}")]
    Timeout(Duration),

    #[error("bridge ended in state {0} before ready")]
    Ended(BridgeState),
}

/// Pump until the child announces readiness, the bridge ends, or `timeout` elapses.
///
/// On timeout the bridge is left running; the caller decides whether to shut it down.
pub async fn wait_ready<S: HostEventSink>(
    bridge: &mut Bridge<S>,
    timeout: Duration,
) -> Result<(), ReadyError> {
    let mut ticker = ticker(bridge.config().poll_interval);
    let wait = async {
        loop {
            ticker.tick().await;
            bridge.pump();
            match bridge.state() {
                BridgeState::Ready => return Ok(()),
                state if !state.is_running() => return Err(ReadyError::Ended(state)),
                _ => {}
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(ReadyError::Timeout(timeout)),
    }
}

/// Run the bridge until it reaches a terminal state or `shutdown` fires.
///
/// Requests are sent as they arrive; delivery failures are logged and do not stop
/// the loop. A closed request channel only stops request intake. Returns the final
/// state.
pub async fn drive<S: HostEventSink>(
    bridge: &mut Bridge<S>,
    mut requests: mpsc::Receiver<HostRequest>,
    shutdown: CancellationToken,
) -> BridgeState {
    let mut ticker = ticker(bridge.config().poll_interval);
    let mut accepting = true;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested");
                bridge.shutdown();
                break;
            }

            request = requests.recv(), if accepting => match request {
                Some(request) => {
                    if let Err(e) = bridge.send_request(request) {
                        tracing::debug!(error = %e, "Request not delivered");
                    }
                }
                None => {
                    tracing::debug!("Request channel closed");
                    accepting = false;
                }
            },

            _ = ticker.tick() => {
                bridge.pump();
                if bridge.state().is_terminal() {
                    break;
                }
            }
        }
    }

    bridge.state()
}
