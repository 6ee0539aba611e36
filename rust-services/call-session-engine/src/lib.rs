//! Call session engine
//!
//! Establishes, maintains and tears down peer-to-peer audio/video links for
//! 1:1 calls and full-mesh group calls:
//! - local capture with mute, camera toggle and screen-share substitution
//! - offer/answer/ICE signaling through an external relay
//! - one link state machine per remote participant
//! - join-order initiator rule for group rooms
//! - on-demand quality sampling and ICE-restart recovery
//!
//! [`CallEngine`] holds the state; [`CallClient`] runs it on a task and is
//! what applications normally use. Native peer connections and capture
//! devices are reached through [`PeerConnectionFactory`] and
//! [`MediaDevices`]; the [`loopback`] module implements both in-process.
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


pub mod client;
pub mod connection;
pub mod connection_health;
pub mod error;
pub mod events;
pub mod link;
pub mod loopback;
pub mod media;
pub mod mesh;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod relay_adapter;
pub mod session;

// Re-export main types
pub use client::CallClient;
pub use connection::{
    CandidatePairState, CandidatePairStats, EngineEvent, EngineEventReceiver, LinkEventSink, NativeConnectionState,
    NativeEvent, OfferOptions, PeerConnection, PeerConnectionFactory, SenderInfo,
};
pub use connection_health::{CallQuality, ConnectionHealthMonitor, QualitySample, Recovery};
pub use error::{CallError, CallErrorKind, CallResult};
pub use events::{
    CallErrorEvent, ConnectionStateEvent, EventBus, PeerJoinedEvent, PeerLeftEvent, RemoteStreamEvent, Topic,
};
pub use link::{LinkRole, LinkState, PeerLink, SignalingState};
pub use loopback::{LoopbackMediaDevices, LoopbackNetwork};
pub use media::{
    LocalStream, MediaConstraints, MediaDevices, MediaKind, MediaTrack, RemoteStream, TrackSource, TrackStatus,
};
pub use mesh::{MeshCoordinator, RosterOutcome};
pub use pipeline::{LocalMediaPipeline, MediaUpdate};
pub use protocol::SignalOutcome;
pub use registry::{PeerRegistry, ProvisionOutcome, TrackPush};
pub use relay_adapter::{Inbound, RelayAdapter};
pub use session::{CallEngine, CallMode, LinkSnapshot, SessionSnapshot};
