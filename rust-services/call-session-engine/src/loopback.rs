//! In-process loopback backend
//!
//! [`LoopbackNetwork`] simulates native peer connections between engines in
//! the same process: once both ends of a pair have completed an offer/answer
//! exchange they report `connecting` then `connected` and surface each
//! other's senders as remote tracks. [`LoopbackMediaDevices`] hands out
//! synthetic capture tracks and can be told to deny access.
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
use meshcall_types::{IceCandidateInit, SdpType, SessionDescription, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::connection::{
    CandidatePairState, CandidatePairStats, LinkEventSink, NativeConnectionState, NativeEvent, OfferOptions,
    PeerConnection, PeerConnectionFactory, SenderInfo,
};
use crate::error::{CallError, CallResult};
use crate::link::SignalingState;
use crate::media::{MediaConstraints, MediaDevices, MediaKind, MediaTrack, TrackSource};

const ICE_RESTART_MARKER: &str = "a=ice-options:restart";
const DEFAULT_RTT_MS: f64 = 20.0;

type PairKey = (UserId, UserId);

struct LoopbackSender {
    id: u64,
    kind: MediaKind,
    track: Option<MediaTrack>,
}

struct Endpoint {
    conn_id: Uuid,
    sink: LinkEventSink,
    signaling: SignalingState,
    local_set: bool,
    remote_set: bool,
    remote_restart: bool,
    state: NativeConnectionState,
    senders: Vec<LoopbackSender>,
    /// Sender ids of the other end already surfaced as remote tracks
    delivered: HashSet<u64>,
    candidates_received: usize,
    rtt_ms: Option<f64>,
}

impl Endpoint {
    fn set_state(&mut self, state: NativeConnectionState) {
        if self.state != state {
            self.state = state;
            self.sink.emit(NativeEvent::StateChanged(state));
        }
    }

    fn negotiated(&self) -> bool {
        self.signaling == SignalingState::Stable && self.local_set && self.remote_set
    }
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<PairKey, Endpoint>,
    next_sender_id: u64,
    failing_offers: HashSet<UserId>,
    failing_answers: HashSet<UserId>,
}

impl NetworkState {
    fn endpoint(&mut self, key: &PairKey, conn_id: Uuid) -> CallResult<&mut Endpoint> {
        self.endpoints
            .get_mut(key)
            .filter(|endpoint| endpoint.conn_id == conn_id)
            .ok_or_else(|| CallError::Backend(format!("connection {} -> {} is closed", key.0, key.1)))
    }

    fn sender_id(&mut self) -> u64 {
        self.next_sender_id += 1;
        self.next_sender_id
    }

    /// Connect both ends once each has completed an exchange
    fn sync_pair(&mut self, key: &PairKey) {
        let mirror = (key.1.clone(), key.0.clone());
        let ready = matches!(
            (self.endpoints.get(key), self.endpoints.get(&mirror)),
            (Some(a), Some(b)) if a.negotiated() && b.negotiated()
        );
        if !ready {
            return;
        }

        for (to, from) in [(key, &mirror), (&mirror, key)] {
            let offered: Vec<(u64, MediaKind)> = match self.endpoints.get(from) {
                Some(endpoint) => endpoint.senders.iter().map(|s| (s.id, s.kind)).collect(),
                None => continue,
            };
            let Some(endpoint) = self.endpoints.get_mut(to) else {
                continue;
            };
            for (id, kind) in offered {
                if endpoint.delivered.insert(id) {
                    let label = format!("{}:{}", from.0, kind);
                    endpoint
                        .sink
                        .emit(NativeEvent::RemoteTrack(MediaTrack::new(kind, TrackSource::Remote, label)));
                }
            }
            if endpoint.state != NativeConnectionState::Connected {
                endpoint.set_state(NativeConnectionState::Connecting);
                endpoint.set_state(NativeConnectionState::Connected);
            }
        }
        trace!(a = %key.0, b = %key.1, "Loopback pair synchronised");
    }
}

fn fake_sdp(sdp_type: SdpType, kinds: &[MediaKind], ice_restart: bool) -> String {
    let mut sdp = format!(
        "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
        rand::random::<u32>()
    );
    for kind in kinds {
        sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF 0\r\n", kind));
    }
    if ice_restart {
        sdp.push_str(ICE_RESTART_MARKER);
        sdp.push_str("\r\n");
    }
    if sdp_type == SdpType::Answer {
        sdp.push_str("a=setup:active\r\n");
    }
    sdp
}

/// Simulated network shared by every engine in a test or demo
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Force a native state on `owner`'s connection to `remote`, as the
    /// ICE agent would
    pub fn inject_state(&self, owner: &UserId, remote: &UserId, state: NativeConnectionState) -> bool {
        let mut network = self.lock();
        match network.endpoints.get_mut(&(owner.clone(), remote.clone())) {
            Some(endpoint) => {
                endpoint.state = state;
                endpoint.sink.emit(NativeEvent::StateChanged(state));
                true
            }
            None => false,
        }
    }

    /// Round-trip time reported once connected; `None` reports no RTT
    pub fn set_rtt(&self, owner: &UserId, remote: &UserId, rtt_ms: Option<f64>) -> bool {
        let mut network = self.lock();
        match network.endpoints.get_mut(&(owner.clone(), remote.clone())) {
            Some(endpoint) => {
                endpoint.rtt_ms = rtt_ms;
                true
            }
            None => false,
        }
    }

    /// Make every offer `user` tries to create fail
    pub fn fail_offers(&self, user: &UserId, fail: bool) {
        let mut network = self.lock();
        if fail {
            network.failing_offers.insert(user.clone());
        } else {
            network.failing_offers.remove(user);
        }
    }

    /// Make every answer `user` tries to create fail
    pub fn fail_answers(&self, user: &UserId, fail: bool) {
        let mut network = self.lock();
        if fail {
            network.failing_answers.insert(user.clone());
        } else {
            network.failing_answers.remove(user);
        }
    }

    pub fn state_of(&self, owner: &UserId, remote: &UserId) -> Option<NativeConnectionState> {
        self.lock()
            .endpoints
            .get(&(owner.clone(), remote.clone()))
            .map(|endpoint| endpoint.state)
    }

    /// Remote candidates accepted by `owner`'s connection to `remote`
    pub fn candidates_received(&self, owner: &UserId, remote: &UserId) -> usize {
        self.lock()
            .endpoints
            .get(&(owner.clone(), remote.clone()))
            .map(|endpoint| endpoint.candidates_received)
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().endpoints.len()
    }
}

impl PeerConnectionFactory for LoopbackNetwork {
    fn create(
        &self,
        local: &UserId,
        remote: &UserId,
        ice_servers: &[String],
        events: LinkEventSink,
    ) -> CallResult<Box<dyn PeerConnection>> {
        let key = (local.clone(), remote.clone());
        let conn_id = Uuid::new_v4();
        self.lock().endpoints.insert(
            key.clone(),
            Endpoint {
                conn_id,
                sink: events,
                signaling: SignalingState::Stable,
                local_set: false,
                remote_set: false,
                remote_restart: false,
                state: NativeConnectionState::New,
                senders: Vec::new(),
                delivered: HashSet::new(),
                candidates_received: 0,
                rtt_ms: Some(DEFAULT_RTT_MS),
            },
        );
        debug!(local = %local, remote = %remote, ice_servers = ice_servers.len(), "Loopback connection created");

        Ok(Box::new(LoopbackConnection {
            network: self.clone(),
            key,
            conn_id,
        }))
    }
}

struct LoopbackConnection {
    network: LoopbackNetwork,
    key: PairKey,
    conn_id: Uuid,
}

impl LoopbackConnection {
    fn wrong_state(&self, operation: &str, state: SignalingState) -> CallError {
        CallError::Backend(format!("{} not allowed in {:?}", operation, state))
    }
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_offer(&mut self, options: OfferOptions) -> CallResult<SessionDescription> {
        let mut network = self.network.lock();
        if network.failing_offers.contains(&self.key.0) {
            return Err(CallError::Backend("offer generation failed".to_string()));
        }
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        let kinds: Vec<MediaKind> = endpoint.senders.iter().map(|s| s.kind).collect();
        Ok(SessionDescription::offer(fake_sdp(SdpType::Offer, &kinds, options.ice_restart)))
    }

    async fn create_answer(&mut self) -> CallResult<SessionDescription> {
        let mut network = self.network.lock();
        if network.failing_answers.contains(&self.key.0) {
            return Err(CallError::Backend("answer generation failed".to_string()));
        }
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        if endpoint.signaling != SignalingState::HaveRemoteOffer {
            return Err(self.wrong_state("create_answer", endpoint.signaling));
        }
        let kinds: Vec<MediaKind> = endpoint.senders.iter().map(|s| s.kind).collect();
        Ok(SessionDescription::answer(fake_sdp(
            SdpType::Answer,
            &kinds,
            endpoint.remote_restart,
        )))
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> CallResult<()> {
        let mut network = self.network.lock();
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        endpoint.signaling = match (description.sdp_type, endpoint.signaling) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
            (_, state) => return Err(self.wrong_state("set_local_description", state)),
        };

        let gather = !endpoint.local_set || description.sdp.contains(ICE_RESTART_MARKER);
        endpoint.local_set = true;
        if gather {
            let port = rand::random::<u16>().max(1024);
            let candidate = IceCandidateInit {
                candidate: format!("candidate:1 1 udp 2130706431 127.0.0.1 {} typ host", port),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            };
            endpoint.sink.emit(NativeEvent::IceCandidate(Some(candidate)));
            endpoint.sink.emit(NativeEvent::IceCandidate(None));
        }

        network.sync_pair(&self.key);
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> CallResult<()> {
        let mut network = self.network.lock();
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        endpoint.signaling = match (description.sdp_type, endpoint.signaling) {
            (SdpType::Offer, SignalingState::Stable) => {
                endpoint.remote_restart = description.sdp.contains(ICE_RESTART_MARKER);
                SignalingState::HaveRemoteOffer
            }
            (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (_, state) => return Err(self.wrong_state("set_remote_description", state)),
        };
        endpoint.remote_set = true;

        network.sync_pair(&self.key);
        Ok(())
    }

    async fn rollback(&mut self) -> CallResult<()> {
        let mut network = self.network.lock();
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        if endpoint.signaling != SignalingState::Stable {
            endpoint.signaling = SignalingState::Stable;
        }
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidateInit) -> CallResult<()> {
        let mut network = self.network.lock();
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        if !endpoint.remote_set {
            return Err(CallError::Backend("remote description not set".to_string()));
        }
        trace!(candidate = %candidate.candidate, "Loopback candidate added");
        endpoint.candidates_received += 1;
        Ok(())
    }

    fn add_track(&mut self, track: MediaTrack) -> CallResult<()> {
        let mut network = self.network.lock();
        let id = network.sender_id();
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        if endpoint.senders.iter().any(|s| s.kind == track.kind()) {
            return Err(CallError::Backend(format!("{} sender already exists", track.kind())));
        }
        endpoint.senders.push(LoopbackSender {
            id,
            kind: track.kind(),
            track: Some(track),
        });
        Ok(())
    }

    async fn replace_track(&mut self, kind: MediaKind, track: Option<MediaTrack>) -> CallResult<()> {
        let mut network = self.network.lock();
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        let sender = endpoint
            .senders
            .iter_mut()
            .find(|s| s.kind == kind)
            .ok_or_else(|| CallError::Backend(format!("no {} sender", kind)))?;
        sender.track = track;
        Ok(())
    }

    fn remove_track(&mut self, kind: MediaKind) -> CallResult<()> {
        let mut network = self.network.lock();
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        endpoint.senders.retain(|s| s.kind != kind);
        Ok(())
    }

    fn senders(&self) -> Vec<SenderInfo> {
        let mut network = self.network.lock();
        match network.endpoint(&self.key, self.conn_id) {
            Ok(endpoint) => endpoint
                .senders
                .iter()
                .map(|s| SenderInfo {
                    kind: s.kind,
                    track: s.track.clone(),
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn candidate_pair_stats(&self) -> CallResult<Vec<CandidatePairStats>> {
        let mut network = self.network.lock();
        let endpoint = network.endpoint(&self.key, self.conn_id)?;
        let pair = |state: CandidatePairState, rtt_ms: Option<f64>| CandidatePairStats {
            state,
            nominated: state == CandidatePairState::Succeeded,
            current_round_trip_time: rtt_ms.map(|ms| ms / 1000.0),
        };
        Ok(match endpoint.state {
            NativeConnectionState::Connected => vec![pair(CandidatePairState::Succeeded, endpoint.rtt_ms)],
            NativeConnectionState::Connecting | NativeConnectionState::Disconnected => {
                vec![pair(CandidatePairState::InProgress, None)]
            }
            NativeConnectionState::Failed => vec![pair(CandidatePairState::Failed, None)],
            NativeConnectionState::New | NativeConnectionState::Closed => Vec::new(),
        })
    }

    async fn close(&mut self) {
        let mut network = self.network.lock();
        let owned = network
            .endpoints
            .get(&self.key)
            .map(|endpoint| endpoint.conn_id == self.conn_id)
            .unwrap_or(false);
        if !owned {
            return;
        }
        network.endpoints.remove(&self.key);

        let mirror = (self.key.1.clone(), self.key.0.clone());
        if let Some(peer) = network.endpoints.get_mut(&mirror) {
            if peer.state == NativeConnectionState::Connected {
                peer.set_state(NativeConnectionState::Disconnected);
            }
        }
        debug!(local = %self.key.0, remote = %self.key.1, "Loopback connection closed");
    }
}

#[derive(Default)]
struct DevicesInner {
    deny_audio: AtomicBool,
    deny_video: AtomicBool,
    deny_display: AtomicBool,
    captured: Mutex<Vec<MediaTrack>>,
}

/// Synthetic capture devices
#[derive(Clone, Default)]
pub struct LoopbackMediaDevices {
    inner: Arc<DevicesInner>,
}

impl LoopbackMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or allow again) capture of `kind`
    pub fn deny(&self, kind: MediaKind, denied: bool) {
        let flag = match kind {
            MediaKind::Audio => &self.inner.deny_audio,
            MediaKind::Video => &self.inner.deny_video,
        };
        flag.store(denied, Ordering::SeqCst);
    }

    pub fn deny_display(&self, denied: bool) {
        self.inner.deny_display.store(denied, Ordering::SeqCst);
    }

    /// Every track handed out so far
    pub fn captured(&self) -> Vec<MediaTrack> {
        self.inner
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn live_tracks(&self) -> Vec<MediaTrack> {
        self.captured().into_iter().filter(MediaTrack::is_live).collect()
    }

    fn record(&self, track: MediaTrack) -> MediaTrack {
        self.inner
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(track.clone());
        track
    }
}

#[async_trait]
impl MediaDevices for LoopbackMediaDevices {
    async fn user_media(&self, constraints: MediaConstraints) -> CallResult<Vec<MediaTrack>> {
        let mut requested = Vec::new();
        if constraints.audio {
            requested.push((MediaKind::Audio, TrackSource::Microphone, &self.inner.deny_audio));
        }
        if constraints.video {
            requested.push((MediaKind::Video, TrackSource::Camera, &self.inner.deny_video));
        }

        if let Some((kind, _, _)) = requested.iter().find(|(_, _, denied)| denied.load(Ordering::SeqCst)) {
            return Err(CallError::MediaAccessDenied {
                kind: *kind,
                reason: "NotAllowedError: permission denied".to_string(),
            });
        }

        Ok(requested
            .into_iter()
            .map(|(kind, source, _)| self.record(MediaTrack::new(kind, source, format!("loopback {}", kind))))
            .collect())
    }

    async fn display_media(&self) -> CallResult<MediaTrack> {
        if self.inner.deny_display.load(Ordering::SeqCst) {
            return Err(CallError::DisplayCaptureDenied(
                "NotAllowedError: permission denied".to_string(),
            ));
        }
        Ok(self.record(MediaTrack::new(MediaKind::Video, TrackSource::Screen, "loopback screen")))
    }
}
