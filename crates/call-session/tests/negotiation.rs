//! Negotiation edge cases: early candidates, duplicates, malformed
//! descriptions, glare and media denial.
//!
//! Remote signals are injected through `CallSessionHandle::on_remote_signal`,
//! which shares the session mailbox with `info()`, so an `info()` round trip
//! proves every earlier signal was processed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use call_session::actors::{CallRole, CallState};
use call_session::errors::CallError;
use call_session::signal::{Signal, SignalKind};
use call_session::transport::InMemorySignalBus;
use call_test_utils::*;

// ============================================================================
// Candidate buffering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_early_candidates_applied_after_offer_in_order() {
    let bus = InMemorySignalBus::new();
    let bob_side = TestParty::builder(bob(), &bus).manual_peers().build();
    let call_id = test_call_id();

    let callee = bob_side
        .registry
        .answer_call(call_id.clone(), alice())
        .await
        .unwrap();

    for label in ["c1", "c2"] {
        callee
            .on_remote_signal(remote_candidate(&call_id, &alice(), &bob(), label))
            .await
            .unwrap();
    }
    let info = callee.info().await.unwrap();
    assert_eq!(info.pending_candidates, 2);
    assert_eq!(info.state, CallState::Ringing);

    let probe = bob_side.peers.probe(&call_id).unwrap();
    assert!(probe.applied_candidates().is_empty());

    callee
        .on_remote_signal(remote_offer(&call_id, &alice(), &bob()))
        .await
        .unwrap();
    let info = callee.info().await.unwrap();
    assert_eq!(info.state, CallState::Negotiating);
    assert_eq!(info.pending_candidates, 0);

    let negotiation_ops: Vec<String> = probe
        .operations()
        .into_iter()
        .filter(|op| op.starts_with("set_remote") || op.starts_with("candidate"))
        .collect();
    assert_eq!(
        negotiation_ops,
        vec!["set_remote:offer", "candidate:c1", "candidate:c2"]
    );

    // A candidate after the offer is applied immediately.
    callee
        .on_remote_signal(remote_candidate(&call_id, &alice(), &bob(), "c3"))
        .await
        .unwrap();
    callee.info().await.unwrap();
    assert_eq!(probe.applied_candidates(), vec!["c1", "c2", "c3"]);

    assert_eq!(
        bob_side
            .transport
            .published_of_kind(SignalKind::Answer)
            .len(),
        1
    );
    callee.hangup().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_and_duplicate_candidates_are_tolerated() {
    let bus = InMemorySignalBus::new();
    let bob_side = TestParty::builder(bob(), &bus).manual_peers().build();
    let call_id = test_call_id();

    let callee = bob_side
        .registry
        .answer_call(call_id.clone(), alice())
        .await
        .unwrap();
    for signal in [
        remote_offer(&call_id, &alice(), &bob()),
        remote_candidate(&call_id, &alice(), &bob(), "stale-1"),
        remote_candidate(&call_id, &alice(), &bob(), "c4"),
        remote_candidate(&call_id, &alice(), &bob(), "c4"),
    ] {
        callee.on_remote_signal(signal).await.unwrap();
    }

    let info = callee.info().await.unwrap();
    assert_eq!(info.state, CallState::Negotiating);
    assert!(info.failure.is_none());
    assert_eq!(
        bob_side.peers.probe(&call_id).unwrap().applied_candidates(),
        vec!["c4", "c4"]
    );
    callee.hangup().await;
}

// ============================================================================
// Duplicates
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_duplicate_offer_answered_once() {
    let bus = InMemorySignalBus::new();
    let bob_side = TestParty::builder(bob(), &bus).manual_peers().build();
    let call_id = test_call_id();

    let callee = bob_side
        .registry
        .answer_call(call_id.clone(), alice())
        .await
        .unwrap();
    for _ in 0..3 {
        callee
            .on_remote_signal(remote_offer(&call_id, &alice(), &bob()))
            .await
            .unwrap();
    }
    let info = callee.info().await.unwrap();

    assert_eq!(info.state, CallState::Negotiating);
    let probe = bob_side.peers.probe(&call_id).unwrap();
    assert_eq!(probe.remote_descriptions().len(), 1);
    assert_eq!(
        bob_side
            .transport
            .published_of_kind(SignalKind::Answer)
            .len(),
        1
    );
    callee.hangup().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_answer_ignored_and_resend_stops() {
    let bus = InMemorySignalBus::new();
    let alice_side = TestParty::builder(alice(), &bus).manual_peers().build();

    let caller = alice_side.registry.place_call(bob()).await.unwrap();
    let call_id = caller.call_id().clone();

    for _ in 0..2 {
        caller
            .on_remote_signal(remote_answer(&call_id, &bob(), &alice()))
            .await
            .unwrap();
    }
    let info = caller.info().await.unwrap();
    assert_eq!(info.state, CallState::Negotiating);

    let probe = alice_side.peers.probe(&call_id).unwrap();
    assert_eq!(probe.remote_descriptions().len(), 1);

    // Answer applied: no more offer re-sends.
    let offers = alice_side
        .transport
        .published_of_kind(SignalKind::Offer)
        .len();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(
        alice_side
            .transport
            .published_of_kind(SignalKind::Offer)
            .len(),
        offers
    );

    probe.emit_remote_track().await;
    wait_for_state(&caller, CallState::Connected).await;
    caller.hangup().await;
}

#[tokio::test(start_paused = true)]
async fn test_answer_without_pending_offer_ignored() {
    let bus = InMemorySignalBus::new();
    let bob_side = TestParty::builder(bob(), &bus).manual_peers().build();
    let call_id = test_call_id();

    let callee = bob_side
        .registry
        .answer_call(call_id.clone(), alice())
        .await
        .unwrap();
    callee
        .on_remote_signal(remote_answer(&call_id, &alice(), &bob()))
        .await
        .unwrap();

    let info = callee.info().await.unwrap();
    assert_eq!(info.state, CallState::Ringing);
    assert!(bob_side
        .peers
        .probe(&call_id)
        .unwrap()
        .remote_descriptions()
        .is_empty());
    callee.hangup().await;
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_malformed_offer_fails_negotiation() {
    let bus = InMemorySignalBus::new();
    let bob_side = TestParty::builder(bob(), &bus).manual_peers().build();
    let call_id = test_call_id();

    let callee = bob_side
        .registry
        .answer_call(call_id.clone(), alice())
        .await
        .unwrap();
    callee
        .on_remote_signal(Signal::offer(
            call_id.clone(),
            alice(),
            bob(),
            malformed_offer(),
        ))
        .await
        .unwrap();

    let snapshot = wait_for_state(&callee, CallState::Failed).await;

    assert!(matches!(
        snapshot.failure,
        Some(CallError::NegotiationFailed(_))
    ));
    assert_eq!(
        snapshot.failure.as_ref().map(CallError::user_message),
        Some("Call failed")
    );
    assert!(bob_side.capture.all_stopped_once());
    assert!(bob_side.peers.probe(&call_id).unwrap().is_closed());
    assert_eq!(
        bob_side
            .transport
            .published_of_kind(SignalKind::EndCall)
            .len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_media_denied_fails_before_any_connection() {
    let bus = InMemorySignalBus::new();
    let alice_side = TestParty::builder(alice(), &bus)
        .capture(FakeMediaCapture::denying("permission dismissed"))
        .build();

    let result = alice_side
        .registry
        .start_call(test_call_id(), bob(), CallRole::Caller)
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, CallError::MediaAcquisitionDenied(_)));
    assert_eq!(
        err.user_message(),
        "Allow camera and microphone access to place calls"
    );
    assert_eq!(alice_side.peers.connections_created(), 0);
    assert!(alice_side.transport.published().is_empty());
    assert!(alice_side.transport.subscriptions().is_empty());

    // Permission granted: the same call id can be retried.
    alice_side.capture.set_denied(None);
    let caller = alice_side
        .registry
        .start_call(test_call_id(), bob(), CallRole::Caller)
        .await
        .unwrap();
    assert_eq!(caller.state(), CallState::Negotiating);

    let recent = alice_side.registry.recent_calls().await.unwrap();
    assert_eq!(recent.len(), 1);
    assert!(matches!(
        recent.first().unwrap().failure,
        Some(CallError::MediaAcquisitionDenied(_))
    ));
    caller.hangup().await;
}

// ============================================================================
// Glare
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_glare_resolved_by_party_id_ordering() {
    let bus = InMemorySignalBus::new();
    let alice_side = TestParty::new(alice(), &bus);
    let bob_side = TestParty::new(bob(), &bus);
    let call_id = test_call_id();

    // Both sides believe they are the caller.
    let a = alice_side
        .registry
        .start_call(call_id.clone(), bob(), CallRole::Caller)
        .await
        .unwrap();
    let b = bob_side
        .registry
        .start_call(call_id.clone(), alice(), CallRole::Caller)
        .await
        .unwrap();

    wait_for_state(&a, CallState::Connected).await;
    wait_for_state(&b, CallState::Connected).await;

    // "alice" < "bob": alice keeps her offer, bob rolls back and answers.
    assert_eq!(alice_side.peers.probe(&call_id).unwrap().rollbacks(), 0);
    assert_eq!(bob_side.peers.probe(&call_id).unwrap().rollbacks(), 1);
    assert!(alice_side
        .transport
        .published_of_kind(SignalKind::Answer)
        .is_empty());
    assert_eq!(
        bob_side.transport.published_of_kind(SignalKind::Answer).len(),
        1
    );

    // Roles stay as created.
    assert_eq!(b.info().await.unwrap().role, CallRole::Caller);
    a.hangup().await;
    wait_for_state(&b, CallState::Ended).await;
}
