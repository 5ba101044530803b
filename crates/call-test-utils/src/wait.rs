//! Helpers that wait for session progress.
//!
//! Timeouts are generous because call-flow tests run with paused time, where
//! the runtime jumps straight to the next timer once every task is idle.

use call_session::actors::{CallEvent, CallSessionHandle, CallState, SessionSnapshot};
use std::time::Duration;
use tokio::sync::broadcast;

/// Longer than the default ring timeout.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Wait until the session reaches `target`.
///
/// Panics if the session settles in a different terminal state first, or if
/// nothing happens within `WAIT_TIMEOUT`.
pub async fn wait_for_state(handle: &CallSessionHandle, target: CallState) -> SessionSnapshot {
    let mut watch = handle.watch();
    let snapshot = tokio::time::timeout(
        WAIT_TIMEOUT,
        watch.wait_for(|s| s.state == target || s.state.is_terminal()),
    )
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {target}, still {}", handle.state()))
    .expect("session snapshot channel closed")
    .clone();

    assert_eq!(
        snapshot.state, target,
        "session settled in {} (failure: {:?}) instead of {target}",
        snapshot.state, snapshot.failure
    );
    snapshot
}

/// Wait until the session is `Ended` or `Failed`.
pub async fn wait_for_terminal(handle: &CallSessionHandle) -> SessionSnapshot {
    let mut watch = handle.watch();
    let snapshot = tokio::time::timeout(WAIT_TIMEOUT, watch.wait_for(|s| s.state.is_terminal()))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for terminal state, still {}", handle.state()))
        .expect("session snapshot channel closed")
        .clone();
    snapshot
}

/// Next event matching `predicate`, skipping others.
pub async fn next_event_matching(
    events: &mut broadcast::Receiver<CallEvent>,
    predicate: impl Fn(&CallEvent) -> bool,
) -> CallEvent {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Let spawned tasks run until every one of them is idle.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
