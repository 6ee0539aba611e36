//! Integration tests for full-mesh group calls through `CallClient`

use call_session_engine::{CallClient, CallQuality, LinkRole, LinkState, LoopbackMediaDevices, LoopbackNetwork};
use meshcall_config::CallConfig;
use meshcall_types::{RoomId, UserId};
use signaling_relay_client::InMemoryRelayHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

async fn clients(hub: &InMemoryRelayHub, network: &LoopbackNetwork, count: usize) -> Vec<CallClient> {
    let mut clients = Vec::with_capacity(count);
    for n in 1..=count {
        let id = UserId::new(format!("u{}", n));
        let relay = Arc::new(hub.connect_with_name(id, format!("User {}", n)).await);
        let client = CallClient::spawn(
            &CallConfig::default(),
            relay,
            Arc::new(LoopbackMediaDevices::new()),
            Arc::new(network.clone()),
        )
        .await
        .expect("Failed to spawn client");
        clients.push(client);
    }
    clients
}

/// Wait until every client holds `expected` connected links
async fn mesh_settled(clients: &[CallClient], expected: usize) {
    timeout(WAIT, async {
        loop {
            let mut settled = true;
            for client in clients {
                let snapshot = client.snapshot().await.unwrap();
                settled &= snapshot.links.len() == expected
                    && snapshot.links.iter().all(|l| l.state == LinkState::Connected);
            }
            if settled {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Mesh did not settle");
}

#[tokio::test]
async fn test_four_party_mesh() {
    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let room = RoomId::new("standup");
    let clients = clients(&hub, &network, 4).await;

    for (joined, client) in clients.iter().enumerate() {
        client.join_group_call(&room, false).await.unwrap();
        mesh_settled(&clients[..=joined], joined).await;
    }
    assert_eq!(network.connection_count(), 12);

    for (i, client) in clients.iter().enumerate() {
        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.room_id, Some(room.clone()));
        for link in &snapshot.links {
            let other = clients.iter().position(|c| c.local_id() == &link.peer).unwrap();
            let expected = if i > other { LinkRole::Initiator } else { LinkRole::Responder };
            assert_eq!(link.role, expected);
        }
    }
}

#[tokio::test]
async fn test_departure_notifies_remaining_members() {
    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let room = RoomId::new("standup");
    let clients = clients(&hub, &network, 3).await;
    for (joined, client) in clients.iter().enumerate() {
        client.join_group_call(&room, false).await.unwrap();
        mesh_settled(&clients[..=joined], joined).await;
    }

    let mut left = clients[0].events().peer_left.subscribe();
    clients[2].end_call().await.unwrap();

    let event = timeout(WAIT, left.recv()).await.unwrap().unwrap();
    assert_eq!(&event.user_id, clients[2].local_id());
    mesh_settled(&clients[..2], 1).await;
    assert_eq!(hub.room_members(&room).await.len(), 2);
}

#[tokio::test]
async fn test_newcomer_announced_with_username() {
    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let room = RoomId::new("standup");
    let clients = clients(&hub, &network, 2).await;

    clients[0].join_group_call(&room, false).await.unwrap();
    let mut joined = clients[0].events().peer_joined.subscribe();
    clients[1].join_group_call(&room, false).await.unwrap();

    let event = timeout(WAIT, joined.recv()).await.unwrap().unwrap();
    assert_eq!(event.user_id, UserId::new("u2"));
    assert_eq!(event.username.as_deref(), Some("User 2"));
}

#[tokio::test]
async fn test_group_quality_tracks_worst_link() {
    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let room = RoomId::new("standup");
    let clients = clients(&hub, &network, 3).await;
    for (joined, client) in clients.iter().enumerate() {
        client.join_group_call(&room, false).await.unwrap();
        mesh_settled(&clients[..=joined], joined).await;
    }

    assert_eq!(clients[0].sample_quality().await.unwrap(), CallQuality::Good);
    network.set_rtt(&UserId::new("u1"), &UserId::new("u3"), Some(180.0));
    assert_eq!(clients[0].sample_quality().await.unwrap(), CallQuality::Fair);
}
