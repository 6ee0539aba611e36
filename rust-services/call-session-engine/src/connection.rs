//! Native peer connection seam
//!
//! The engine talks to a WebRTC stack only through [`PeerConnection`] and
//! [`PeerConnectionFactory`]. Backend callbacks are delivered as [`EngineEvent`]s
//! tagged with the remote peer, never by calling back into the engine.
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


use async_trait::async_trait;
use meshcall_types::{IceCandidateInit, SessionDescription, UserId};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::CallResult;
use crate::media::{MediaKind, MediaTrack, TrackStatus};

/// Connection state as reported by the native stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callback raised by one native connection
#[derive(Debug, Clone)]
pub enum NativeEvent {
    /// A local candidate was gathered; `None` marks end of gathering
    IceCandidate(Option<IceCandidateInit>),
    StateChanged(NativeConnectionState),
    RemoteTrack(MediaTrack),
}

/// Input for the engine that does not come from the relay or the facade
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Link { peer: UserId, event: NativeEvent },
    /// A local track stopped being live
    TrackEnded { track_id: Uuid, status: TrackStatus },
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Per-link callback target handed to the backend on creation
#[derive(Debug, Clone)]
pub struct LinkEventSink {
    peer: UserId,
    tx: EngineEventSender,
}

impl LinkEventSink {
    pub fn new(peer: UserId, tx: EngineEventSender) -> Self {
        LinkEventSink { peer, tx }
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    /// Queue an event for the engine; false once the engine is gone
    pub fn emit(&self, event: NativeEvent) -> bool {
        self.tx
            .send(EngineEvent::Link {
                peer: self.peer.clone(),
                event,
            })
            .is_ok()
    }
}

/// ICE candidate pair state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePairState {
    /// Pair created, waiting to be checked
    Waiting,
    /// Connectivity check in progress
    InProgress,
    /// Connectivity check succeeded
    Succeeded,
    /// Connectivity check failed
    Failed,
    /// Not checked yet
    Frozen,
}

/// One entry of a connection's candidate-pair statistics
#[derive(Debug, Clone)]
pub struct CandidatePairStats {
    pub state: CandidatePairState,
    pub nominated: bool,
    /// Seconds, as reported by the stats API
    pub current_round_trip_time: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfferOptions {
    pub ice_restart: bool,
}

/// Outbound sender of one media kind
#[derive(Debug, Clone)]
pub struct SenderInfo {
    pub kind: MediaKind,
    /// `None` while the sender is negotiated but idle
    pub track: Option<MediaTrack>,
}

/// One native peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&mut self, options: OfferOptions) -> CallResult<SessionDescription>;

    async fn create_answer(&mut self) -> CallResult<SessionDescription>;

    async fn set_local_description(&mut self, description: SessionDescription) -> CallResult<()>;

    async fn set_remote_description(&mut self, description: SessionDescription) -> CallResult<()>;

    /// Discard a pending local offer
    async fn rollback(&mut self) -> CallResult<()>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidateInit) -> CallResult<()>;

    /// Add a new sender; requires renegotiation to take effect
    fn add_track(&mut self, track: MediaTrack) -> CallResult<()>;

    /// Swap the track of the existing sender of `kind` in place
    async fn replace_track(&mut self, kind: MediaKind, track: Option<MediaTrack>) -> CallResult<()>;

    /// Remove the sender of `kind`, if any
    fn remove_track(&mut self, kind: MediaKind) -> CallResult<()>;

    fn senders(&self) -> Vec<SenderInfo>;

    async fn candidate_pair_stats(&self) -> CallResult<Vec<CandidatePairStats>>;

    async fn close(&mut self);
}

/// Creates native connections bound to a callback sink.
///
/// Creation is synchronous so a link can be inserted into the registry in a
/// single step.
pub trait PeerConnectionFactory: Send + Sync {
    fn create(
        &self,
        local: &UserId,
        remote: &UserId,
        ice_servers: &[String],
        events: LinkEventSink,
    ) -> CallResult<Box<dyn PeerConnection>>;
}
