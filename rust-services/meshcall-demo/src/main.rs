//! Mesh call demo
//!
//! Runs a small group call entirely in-process: an in-memory relay hub,
//! loopback peer connections and one `CallClient` per participant.
//! `MESHCALL_DEMO_PEERS` sets the room size (default 3).
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use anyhow::{Context, Result};
use call_session_engine::{CallClient, LinkState, LoopbackMediaDevices, LoopbackNetwork};
use meshcall_config::CallConfig;
use meshcall_logging::{try_init, LogFormat};
use meshcall_types::{RoomId, UserId};
use signaling_relay_client::InMemoryRelayHub;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = CallConfig::from_env().context("Failed to load configuration")?;
    if let Err(e) = try_init("meshcall-demo", config.log_level(), LogFormat::from_json_flag(config.log_json)) {
        eprintln!("meshcall-demo: {}", e);
    }

    let peers: usize = std::env::var("MESHCALL_DEMO_PEERS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .filter(|n| *n >= 2)
        .unwrap_or(3);
    let room = RoomId::new("demo-room");
    info!(peers, room = %room, "Starting mesh call demo");

    let hub = InMemoryRelayHub::new();
    let network = LoopbackNetwork::new();
    let mut clients = Vec::with_capacity(peers);
    for n in 1..=peers {
        let id = UserId::new(format!("user-{}", n));
        let relay = Arc::new(hub.connect_with_name(id.clone(), format!("User {}", n)).await);
        let client = CallClient::spawn(
            &config,
            relay,
            Arc::new(LoopbackMediaDevices::new()),
            Arc::new(network.clone()),
        )
        .await
        .with_context(|| format!("Failed to start client {}", id))?;
        clients.push(client);
    }

    for client in &clients {
        client.join_group_call(&room, false).await?;
        settle(&clients, SETTLE_TIMEOUT).await?;
    }
    info!(links = peers * (peers - 1) / 2, "Mesh connected");

    let presenter = &clients[0];
    presenter.set_video_enabled(true).await?;
    settle(&clients, SETTLE_TIMEOUT).await?;

    for client in &clients {
        let quality = client.sample_quality().await?;
        let snapshot = client.snapshot().await?;
        let remote_tracks: usize = snapshot.links.iter().map(|l| l.remote_tracks).sum();
        info!(
            user = %client.local_id(),
            quality = quality.as_str(),
            links = snapshot.links.len(),
            remote_tracks,
            "Participant status"
        );
    }

    for client in &clients {
        client.end_call().await?;
        client.shutdown().await?;
    }
    info!("Mesh call demo finished");
    Ok(())
}

/// Wait until every client's links are connected
async fn settle(clients: &[CallClient], timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mut pending = 0;
        for client in clients {
            let snapshot = client.snapshot().await?;
            pending += snapshot
                .links
                .iter()
                .filter(|link| link.state != LinkState::Connected)
                .count();
        }
        if pending == 0 {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(pending, "Links did not settle");
            anyhow::bail!("{} link(s) still connecting after {:?}", pending, timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
