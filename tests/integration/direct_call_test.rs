//! Integration tests for 1:1 calls through `CallClient`
//!
//! Each client runs its own driver task; peers talk through the in-memory
//! relay hub and the loopback network.

use call_session_engine::{
    CallClient, CallError, CallErrorKind, LinkState, LoopbackMediaDevices, LoopbackNetwork, TrackSource,
};
use meshcall_config::CallConfig;
use meshcall_types::UserId;
use signaling_relay_client::InMemoryRelayHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn client(hub: &InMemoryRelayHub, network: &LoopbackNetwork, name: &str) -> CallClient {
    let relay = Arc::new(hub.connect(UserId::new(name)).await);
    CallClient::spawn(
        &CallConfig::default(),
        relay,
        Arc::new(LoopbackMediaDevices::new()),
        Arc::new(network.clone()),
    )
    .await
    .expect("Failed to spawn client")
}

/// Receive until `accept` matches, failing after `WAIT`
async fn wait_for<T: Clone>(rx: &mut broadcast::Receiver<T>, accept: impl Fn(&T) -> bool) -> T {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if accept(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}

#[tokio::test]
async fn test_direct_call_connects_and_ends() {
    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let alice = client(&hub, &network, "alice").await;
    let bob = client(&hub, &network, "bob").await;

    let mut alice_states = alice.events().connection_state.subscribe();
    let mut bob_streams = bob.events().remote_stream.subscribe();

    let stream = alice.start_call(bob.local_id(), true).await.unwrap();
    assert!(stream.audio().is_some());
    assert!(stream.video().is_some());

    wait_for(&mut alice_states, |e| e.state == LinkState::Connected).await;
    let remote = wait_for(&mut bob_streams, |e| e.stream.tracks().len() == 2).await;
    assert_eq!(remote.user_id, UserId::new("alice"));

    let snapshot = bob.snapshot().await.unwrap();
    assert!(snapshot.is_active());
    assert!(!snapshot.local_audio);

    alice.end_call().await.unwrap();
    wait_for(&mut alice_states, |e| e.state == LinkState::Closed).await;
    assert!(!alice.snapshot().await.unwrap().is_active());

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_call_rejected_while_active() {
    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let alice = client(&hub, &network, "alice").await;
    let _bob = client(&hub, &network, "bob").await;

    alice.start_call(&UserId::new("bob"), false).await.unwrap();
    let err = alice.start_call(&UserId::new("carol"), false).await.unwrap_err();
    assert!(matches!(err, CallError::SessionAlreadyActive));
}

#[tokio::test]
async fn test_screen_share_revocation_restores_camera() {
    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let alice = client(&hub, &network, "alice").await;
    let bob = client(&hub, &network, "bob").await;
    let mut local = alice.events().local_stream.subscribe();
    let mut states = alice.events().connection_state.subscribe();

    alice.start_call(bob.local_id(), true).await.unwrap();
    wait_for(&mut states, |e| e.state == LinkState::Connected).await;

    alice.start_screen_share().await.unwrap();
    let shared = wait_for(&mut local, |s| {
        s.video().map(|t| t.source() == TrackSource::Screen).unwrap_or(false)
    })
    .await;
    assert!(alice.snapshot().await.unwrap().screen_sharing);

    shared.video().unwrap().end();
    wait_for(&mut local, |s| {
        s.video().map(|t| t.source() == TrackSource::Camera).unwrap_or(false)
    })
    .await;
    assert!(!alice.snapshot().await.unwrap().screen_sharing);
}

#[tokio::test]
async fn test_media_toggle_without_session_errors() {
    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let alice = client(&hub, &network, "alice").await;
    let mut errors = alice.events().error.subscribe();

    let err = alice.set_video_enabled(true).await.unwrap_err();
    assert!(matches!(err, CallError::NoActiveSession));
    assert!(errors.try_recv().is_err());

    assert!(matches!(
        alice.start_screen_share().await,
        Err(CallError::NoActiveSession)
    ));
    assert_eq!(CallError::NoActiveSession.kind(), CallErrorKind::Session);
}

#[tokio::test]
async fn test_commands_fail_after_shutdown() {
    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let alice = client(&hub, &network, "alice").await;

    alice.shutdown().await.unwrap();
    tokio::task::yield_now().await;
    assert!(matches!(
        alice.snapshot().await,
        Err(CallError::ClientStopped)
    ));
}
