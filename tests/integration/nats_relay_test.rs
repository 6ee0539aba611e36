//! Integration tests against a live NATS relay
//!
//! These tests require a NATS server on `nats://localhost:4222`.

use call_session_engine::{CallClient, LinkState, LoopbackMediaDevices, LoopbackNetwork};
use meshcall_config::CallConfig;
use meshcall_types::UserId;
use signaling_relay_client::NatsRelay;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

async fn nats_client(config: &CallConfig, network: &LoopbackNetwork, name: &str) -> CallClient {
    let relay = NatsRelay::connect(config.relay_url(), UserId::new(name), config.subject_prefix.clone())
        .await
        .expect("Failed to connect to NATS");
    CallClient::spawn(
        config,
        Arc::new(relay),
        Arc::new(LoopbackMediaDevices::new()),
        Arc::new(network.clone()),
    )
    .await
    .expect("Failed to spawn client")
}

#[tokio::test]
#[ignore] // Requires NATS server
async fn test_direct_call_over_nats() {
    let config = CallConfig {
        subject_prefix: format!("meshcall-test-{}", uuid::Uuid::new_v4().simple()),
        ..CallConfig::default()
    };
    let network = LoopbackNetwork::new();
    let alice = nats_client(&config, &network, "alice").await;
    let bob = nats_client(&config, &network, "bob").await;
    let mut states = alice.events().connection_state.subscribe();

    alice.start_call(bob.local_id(), false).await.unwrap();

    let connected = timeout(Duration::from_secs(10), async {
        while let Ok(event) = states.recv().await {
            if event.state == LinkState::Connected {
                return true;
            }
        }
        false
    })
    .await
    .expect("Timed out waiting for the call to connect");
    assert!(connected);

    alice.end_call().await.unwrap();
    bob.end_call().await.unwrap();
}
