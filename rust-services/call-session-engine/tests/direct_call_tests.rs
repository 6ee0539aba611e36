//! 1:1 call scenarios

mod common;

use call_session_engine::{CallError, CallMode, LinkRole, LinkState, MediaKind};
use common::{drain, user, Harness};
use meshcall_types::{RoomId, SignalKind};

async fn two_party() -> Harness {
    let mut h = Harness::new();
    h.add("alice").await;
    h.add("bob").await;
    h
}

#[tokio::test]
async fn test_audio_only_call_connects_and_ends() {
    let mut h = two_party().await;
    let mut alice_states = h.peer("alice").engine.events().connection_state.subscribe();
    let mut bob_streams = h.peer("bob").engine.events().remote_stream.subscribe();

    let stream = h.engine("alice").start_call(&user("bob"), false).await.unwrap();
    assert!(stream.audio().is_some());
    assert!(stream.video().is_none());

    h.pump().await;

    let states: Vec<LinkState> = drain(&mut alice_states).into_iter().map(|e| e.state).collect();
    assert_eq!(states, vec![LinkState::Connecting, LinkState::Connected]);

    let remote = drain(&mut bob_streams);
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].user_id, user("alice"));
    assert!(remote[0].stream.has(MediaKind::Audio));
    assert!(!remote[0].stream.has(MediaKind::Video));

    let alice = h.peer("alice").engine.snapshot();
    let link = alice.link(&user("bob")).unwrap();
    assert_eq!(alice.mode, Some(CallMode::Direct));
    assert_eq!(link.role, LinkRole::Initiator);
    assert_eq!(link.state, LinkState::Connected);
    assert_eq!(link.ice_restarts, 0);

    let bob = h.peer("bob").engine.snapshot();
    assert_eq!(bob.link(&user("alice")).unwrap().role, LinkRole::Responder);
    assert_eq!(bob.link(&user("alice")).unwrap().state, LinkState::Connected);

    h.engine("alice").end_call().await.unwrap();
    let states: Vec<LinkState> = drain(&mut alice_states).into_iter().map(|e| e.state).collect();
    assert_eq!(states, vec![LinkState::Closed]);
    assert!(h.peer("alice").devices.live_tracks().is_empty());
    assert!(!h.peer("alice").engine.is_active());
    assert!(h.peer("alice").engine.registry().is_empty());
}

#[tokio::test]
async fn test_one_offer_one_answer() {
    let mut h = two_party().await;
    h.engine("alice").start_call(&user("bob"), true).await.unwrap();
    h.pump().await;

    let alice = user("alice");
    let bob = user("bob");
    assert_eq!(h.hub.signals_between(&alice, &bob, SignalKind::Offer).await, 1);
    assert_eq!(h.hub.signals_between(&bob, &alice, SignalKind::Answer).await, 1);
    assert_eq!(h.hub.signals_between(&bob, &alice, SignalKind::Offer).await, 0);
    assert!(h.hub.signals_between(&alice, &bob, SignalKind::IceCandidate).await >= 1);
}

#[tokio::test]
async fn test_callee_sees_disconnect_when_caller_ends() {
    let mut h = two_party().await;
    h.engine("alice").start_call(&user("bob"), false).await.unwrap();
    h.pump().await;

    let mut bob_states = h.peer("bob").engine.events().connection_state.subscribe();
    h.engine("alice").end_call().await.unwrap();
    h.pump().await;

    let states: Vec<LinkState> = drain(&mut bob_states).into_iter().map(|e| e.state).collect();
    assert_eq!(states, vec![LinkState::Disconnected]);
}

#[tokio::test]
async fn test_second_session_rejected() {
    let mut h = two_party().await;
    h.engine("alice").start_call(&user("bob"), false).await.unwrap();

    let err = h.engine("alice").start_call(&user("bob"), false).await.unwrap_err();
    assert!(matches!(err, CallError::SessionAlreadyActive));

    let err = h
        .engine("alice")
        .join_group_call(&RoomId::new("standup"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::SessionAlreadyActive));
}

#[tokio::test]
async fn test_end_call_is_idempotent() {
    let mut h = two_party().await;
    h.engine("alice").end_call().await.unwrap();

    h.engine("alice").start_call(&user("bob"), false).await.unwrap();
    h.engine("alice").end_call().await.unwrap();
    h.engine("alice").end_call().await.unwrap();
    assert!(!h.peer("alice").engine.is_active());
}

#[tokio::test]
async fn test_new_call_after_end() {
    let mut h = two_party().await;
    h.engine("alice").start_call(&user("bob"), false).await.unwrap();
    h.pump().await;
    h.engine("alice").end_call().await.unwrap();
    h.engine("bob").end_call().await.unwrap();
    h.pump().await;

    h.engine("bob").start_call(&user("alice"), false).await.unwrap();
    h.pump().await;

    let alice = h.peer("alice").engine.snapshot();
    assert_eq!(alice.link(&user("bob")).unwrap().role, LinkRole::Responder);
    assert_eq!(alice.link(&user("bob")).unwrap().state, LinkState::Connected);
}

#[tokio::test]
async fn test_offer_from_third_party_ignored() {
    let mut h = two_party().await;
    h.add("carol").await;
    h.engine("alice").start_call(&user("bob"), false).await.unwrap();
    h.pump().await;

    h.engine("carol").start_call(&user("alice"), false).await.unwrap();
    h.pump().await;

    let alice = h.peer("alice").engine.snapshot();
    assert_eq!(alice.links.len(), 1);
    assert!(alice.link(&user("carol")).is_none());
    assert_eq!(
        h.hub
            .signals_between(&user("alice"), &user("carol"), SignalKind::Answer)
            .await,
        0
    );
}

#[tokio::test]
async fn test_media_controls_need_a_session() {
    let mut h = two_party().await;
    assert!(matches!(
        h.engine("alice").set_audio_enabled(false).await,
        Err(CallError::NoActiveSession)
    ));
    assert!(matches!(
        h.engine("alice").start_screen_share().await,
        Err(CallError::NoActiveSession)
    ));
}
