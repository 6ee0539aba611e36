//! Deterministic multi-engine harness
//!
//! Every engine shares one in-memory relay hub and one loopback network.
//! `pump` drains relay inboxes and backend callbacks round-robin until
//! nothing moves.

#![allow(dead_code)]

use call_session_engine::{CallEngine, EngineEventReceiver, LoopbackMediaDevices, LoopbackNetwork};
use futures::{FutureExt, StreamExt};
use meshcall_config::CallConfig;
use meshcall_types::UserId;
use signaling_relay_client::{InMemoryRelayHub, RelayEventStream};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct Peer {
    pub id: UserId,
    pub engine: CallEngine,
    pub devices: LoopbackMediaDevices,
    relay_events: RelayEventStream,
    engine_events: EngineEventReceiver,
}

impl Peer {
    /// Handle everything already queued for this engine
    async fn drain(&mut self) -> bool {
        let mut progressed = false;
        while let Some(Some(event)) = self.relay_events.next().now_or_never() {
            if let Ok(event) = event {
                self.engine.handle_relay_event(event).await;
            }
            progressed = true;
        }
        while let Ok(event) = self.engine_events.try_recv() {
            self.engine.handle_engine_event(event).await;
            progressed = true;
        }
        progressed
    }
}

pub struct Harness {
    pub hub: InMemoryRelayHub,
    pub network: LoopbackNetwork,
    peers: BTreeMap<String, Peer>,
}

impl Harness {
    pub fn new() -> Self {
        Harness {
            hub: InMemoryRelayHub::new(),
            network: LoopbackNetwork::new(),
            peers: BTreeMap::new(),
        }
    }

    pub async fn add(&mut self, name: &str) {
        self.add_with_config(name, CallConfig::default()).await;
    }

    pub async fn add_with_config(&mut self, name: &str, config: CallConfig) {
        let id = UserId::new(name);
        let relay = Arc::new(self.hub.connect(id.clone()).await);
        let devices = LoopbackMediaDevices::new();
        let (engine, engine_events) = CallEngine::new(
            &config,
            relay,
            Arc::new(devices.clone()),
            Arc::new(self.network.clone()),
        )
        .expect("engine");
        let relay_events = engine.relay_events().await.expect("relay subscription");

        self.peers.insert(
            name.to_string(),
            Peer {
                id,
                engine,
                devices,
                relay_events,
                engine_events,
            },
        );
    }

    pub fn peer(&self, name: &str) -> &Peer {
        self.peers.get(name).expect("unknown peer")
    }

    pub fn peer_mut(&mut self, name: &str) -> &mut Peer {
        self.peers.get_mut(name).expect("unknown peer")
    }

    pub fn engine(&mut self, name: &str) -> &mut CallEngine {
        &mut self.peer_mut(name).engine
    }

    /// Run until every relay inbox and callback queue stays empty
    pub async fn pump(&mut self) {
        let mut idle_rounds = 0;
        for _ in 0..500 {
            let mut progressed = false;
            for peer in self.peers.values_mut() {
                progressed |= peer.drain().await;
            }
            if progressed {
                idle_rounds = 0;
            } else {
                idle_rounds += 1;
                if idle_rounds >= 3 {
                    return;
                }
            }
            tokio::task::yield_now().await;
        }
        panic!("engines did not settle");
    }
}

pub fn user(name: &str) -> UserId {
    UserId::new(name)
}

/// Everything currently buffered in a subscription
pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
