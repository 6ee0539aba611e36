//! Call session facade
//!
//! [`CallEngine`] owns the whole session: local media, the peer registry,
//! the mesh coordinator and the health monitor. Every public operation and
//! every inbound event handler takes `&mut self` and runs to completion, so
//! nothing interleaves mid-step.
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


use chrono::{DateTime, Utc};
use meshcall_config::CallConfig;
use meshcall_types::{RelayEvent, RoomId, SignalPayload, SignalingEnvelope, UserId};
use serde::Serialize;
use signaling_relay_client::{RelayEventStream, SignalingRelay};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::connection::{
    EngineEvent, EngineEventReceiver, EngineEventSender, NativeConnectionState, NativeEvent, PeerConnectionFactory,
};
use crate::connection_health::{CallQuality, ConnectionHealthMonitor, QualitySample, Recovery};
use crate::error::{CallError, CallResult};
use crate::events::{CallErrorEvent, ConnectionStateEvent, EventBus, PeerJoinedEvent, PeerLeftEvent, RemoteStreamEvent};
use crate::link::{LinkRole, LinkState, SignalingState};
use crate::media::{LocalStream, MediaDevices, MediaTrack};
use crate::mesh::MeshCoordinator;
use crate::pipeline::{LocalMediaPipeline, MediaUpdate};
use crate::protocol;
use crate::registry::{PeerRegistry, ProvisionOutcome};
use crate::relay_adapter::{Inbound, RelayAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// 1:1 call
    Direct,
    /// Full-mesh group call
    Group,
}

struct CallSession {
    mode: CallMode,
    /// The single remote of a direct call
    remote: Option<UserId>,
    mesh: Option<MeshCoordinator>,
    /// Last state published on `connection_state`
    published_state: Option<LinkState>,
    started_at: DateTime<Utc>,
}

impl CallSession {
    fn direct(remote: UserId) -> Self {
        CallSession {
            mode: CallMode::Direct,
            remote: Some(remote),
            mesh: None,
            published_state: None,
            started_at: Utc::now(),
        }
    }

    fn group(room_id: RoomId) -> Self {
        CallSession {
            mode: CallMode::Group,
            remote: None,
            mesh: Some(MeshCoordinator::new(room_id)),
            published_state: None,
            started_at: Utc::now(),
        }
    }

    fn room_id(&self) -> Option<&RoomId> {
        self.mesh.as_ref().map(MeshCoordinator::room_id)
    }
}

/// Read-only view of one link
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSnapshot {
    pub peer: UserId,
    pub link_id: Uuid,
    pub role: LinkRole,
    pub state: LinkState,
    pub signaling_state: SignalingState,
    pub ice_restarts: u32,
    pub offers_sent: u32,
    pub remote_tracks: usize,
}

/// Read-only view of the engine
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub local_id: UserId,
    pub mode: Option<CallMode>,
    pub room_id: Option<RoomId>,
    pub started_at: Option<DateTime<Utc>>,
    pub local_audio: bool,
    pub local_video: bool,
    pub screen_sharing: bool,
    /// Sorted by peer
    pub links: Vec<LinkSnapshot>,
}

impl SessionSnapshot {
    pub fn is_active(&self) -> bool {
        self.mode.is_some()
    }

    pub fn link(&self, peer: &UserId) -> Option<&LinkSnapshot> {
        self.links.iter().find(|link| &link.peer == peer)
    }
}

/// Single-owner call session manager
pub struct CallEngine {
    local_id: UserId,
    relay: RelayAdapter,
    pipeline: LocalMediaPipeline,
    registry: PeerRegistry,
    health: ConnectionHealthMonitor,
    events: EventBus,
    engine_tx: EngineEventSender,
    session: Option<CallSession>,
}

impl CallEngine {
    /// Build an engine for the relay's user. The receiver carries backend
    /// callbacks and must be fed back through [`CallEngine::handle_engine_event`].
    pub fn new(
        config: &CallConfig,
        relay: Arc<dyn SignalingRelay>,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> CallResult<(Self, EngineEventReceiver)> {
        config.validate().map_err(|e| CallError::Config(e.to_string()))?;

        let local_id = relay.local_user().clone();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let registry = PeerRegistry::new(
            local_id.clone(),
            factory,
            config.ice_servers.clone(),
            engine_tx.clone(),
        );

        info!(user = %local_id, relay = relay.client_type(), "Call engine created");
        let engine = CallEngine {
            local_id,
            relay: RelayAdapter::new(relay),
            pipeline: LocalMediaPipeline::new(devices),
            registry,
            health: ConnectionHealthMonitor::new(
                config.quality_good_rtt_ms,
                config.quality_fair_rtt_ms,
                config.max_ice_restarts,
            ),
            events: EventBus::new(config.event_channel_capacity),
            engine_tx,
            session: None,
        };
        Ok((engine, engine_rx))
    }

    pub fn local_id(&self) -> &UserId {
        &self.local_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn local_stream(&self) -> &LocalStream {
        self.pipeline.stream()
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Inbound relay traffic for this user
    pub async fn relay_events(&self) -> CallResult<RelayEventStream> {
        self.relay.subscribe().await
    }

    /// Call one user: capture media, then offer.
    pub async fn start_call(&mut self, target: &UserId, video: bool) -> CallResult<LocalStream> {
        if self.session.is_some() {
            return Err(CallError::SessionAlreadyActive);
        }

        let stream = self.acquire_media(video).await;
        self.session = Some(CallSession::direct(target.clone()));
        info!(peer = %target, video, "Starting direct call");

        match self.registry.get_or_create(target, true, &stream, &self.relay).await {
            Ok(ProvisionOutcome::CreatedWithoutOffer(e)) => self.events.publish_link_error(target, &e),
            Ok(_) => {}
            Err(e) => {
                self.events.publish_link_error(target, &e);
                self.reset_session().await;
                return Err(e);
            }
        }
        self.publish_direct_state();
        Ok(stream)
    }

    /// Join a group room; links are opened when the roster arrives.
    pub async fn join_group_call(&mut self, room_id: &RoomId, video: bool) -> CallResult<LocalStream> {
        if self.session.is_some() {
            return Err(CallError::SessionAlreadyActive);
        }

        let stream = self.acquire_media(video).await;
        let session = CallSession::group(room_id.clone());
        let joined = match &session.mesh {
            Some(mesh) => mesh.join(&self.relay).await,
            None => Ok(()),
        };
        self.session = Some(session);

        if let Err(e) = joined {
            self.events.publish_error(&e);
            self.reset_session().await;
            return Err(e);
        }
        info!(room = %room_id, video, "Joined group call");
        Ok(stream)
    }

    /// Ask the relay to invite a user into the active room
    pub async fn invite(&mut self, user_id: &UserId) -> CallResult<()> {
        let session = self.session.as_ref().ok_or(CallError::NoActiveSession)?;
        let room_id = session.room_id().ok_or(CallError::NotInGroup)?;
        self.relay.invite(room_id, user_id).await?;
        info!(room = %room_id, peer = %user_id, "Invite sent");
        Ok(())
    }

    /// Leave the call: close every link and stop every local track.
    /// Calling it without a session is a no-op.
    pub async fn end_call(&mut self) -> CallResult<()> {
        let Some(session) = self.session.as_mut() else {
            debug!("end_call without a session");
            return Ok(());
        };

        if let Some(mesh) = session.mesh.as_mut() {
            if let Err(e) = mesh.leave(&self.relay).await {
                warn!(room = %mesh.room_id(), error = %e, "Leave announcement failed");
            }
        }
        if let Some(remote) = session.remote.clone() {
            if self.registry.contains(&remote) {
                self.events.connection_state.publish(ConnectionStateEvent {
                    peer: remote,
                    state: LinkState::Closed,
                });
            }
        }

        let closed = self.reset_session().await;
        info!(links = closed, "Call ended");
        Ok(())
    }

    async fn reset_session(&mut self) -> usize {
        let closed = self.registry.teardown_all().await;
        self.pipeline.release();
        self.health.reset();
        self.session = None;
        closed
    }

    async fn acquire_media(&mut self, video: bool) -> LocalStream {
        let (stream, denied) = self.pipeline.acquire(video).await;
        for error in &denied {
            self.events.publish_error(error);
        }
        self.events.local_stream.publish(stream.clone());
        stream
    }

    fn require_session(&self) -> CallResult<()> {
        match self.session {
            Some(_) => Ok(()),
            None => Err(CallError::NoActiveSession),
        }
    }

    pub async fn set_audio_enabled(&mut self, enabled: bool) -> CallResult<()> {
        self.require_session()?;
        let update = self
            .pipeline
            .set_audio_enabled(enabled, &mut self.registry, &self.relay)
            .await;
        self.apply_update(update)
    }

    pub async fn set_video_enabled(&mut self, enabled: bool) -> CallResult<()> {
        self.require_session()?;
        let update = self
            .pipeline
            .set_video_enabled(enabled, &mut self.registry, &self.relay)
            .await;
        self.apply_update(update)
    }

    pub async fn start_screen_share(&mut self) -> CallResult<()> {
        self.require_session()?;
        let (screen, update) = match self
            .pipeline
            .start_screen_share(&mut self.registry, &self.relay)
            .await
        {
            Ok(started) => started,
            Err(e) => {
                warn!(error = %e, "Screen share refused");
                self.events.publish_error(&e);
                return Err(e);
            }
        };
        if update.changed {
            self.watch_track(screen);
        }
        self.apply_update(update)
    }

    pub async fn stop_screen_share(&mut self) -> CallResult<()> {
        self.require_session()?;
        let update = self
            .pipeline
            .stop_screen_share(&mut self.registry, &self.relay)
            .await;
        self.apply_update(update)
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.pipeline.is_screen_sharing()
    }

    /// Report when a track stops being live
    fn watch_track(&self, track: MediaTrack) {
        let tx = self.engine_tx.clone();
        tokio::spawn(async move {
            let status = track.finished().await;
            let _ = tx.send(EngineEvent::TrackEnded {
                track_id: track.id(),
                status,
            });
        });
    }

    /// Publish what a pipeline mutation did; the first session-scoped
    /// failure is also returned
    fn apply_update(&mut self, update: MediaUpdate) -> CallResult<()> {
        if update.changed {
            self.events.local_stream.publish(self.pipeline.stream().clone());
        }

        let mut first = None;
        for (peer, error) in update.failures {
            match peer {
                Some(peer) => self.events.publish_link_error(&peer, &error),
                None => {
                    self.events.publish_error(&error);
                    if first.is_none() {
                        first = Some(error);
                    }
                }
            }
        }
        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Quality of the call: the single link of a direct call, or the worst
    /// known link of a group call
    pub async fn sample_quality(&mut self) -> CallResult<CallQuality> {
        let peers = match self.session.as_ref() {
            None => return Ok(CallQuality::Unknown),
            Some(session) => match &session.remote {
                Some(remote) => vec![remote.clone()],
                None => self.registry.ids(),
            },
        };

        let mut qualities = Vec::with_capacity(peers.len());
        for peer in &peers {
            if let Some(link) = self.registry.get(peer) {
                qualities.push(self.health.sample_link(link).await?.quality);
            }
        }
        Ok(CallQuality::worst(qualities))
    }

    pub async fn sample_link_quality(&mut self, peer: &UserId) -> CallResult<QualitySample> {
        let link = self
            .registry
            .get(peer)
            .ok_or_else(|| CallError::LinkNotFound { peer: peer.clone() })?;
        self.health.sample_link(link).await
    }

    pub fn quality_history(&self) -> Vec<QualitySample> {
        self.health.history().cloned().collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut links: Vec<LinkSnapshot> = self
            .registry
            .links()
            .map(|link| LinkSnapshot {
                peer: link.remote_id().clone(),
                link_id: link.link_id(),
                role: link.role(),
                state: link.state(),
                signaling_state: link.signaling_state(),
                ice_restarts: link.ice_restarts(),
                offers_sent: link.offers_sent(),
                remote_tracks: link.remote_stream().tracks().len(),
            })
            .collect();
        links.sort_by(|a, b| a.peer.cmp(&b.peer));

        let stream = self.pipeline.stream();
        SessionSnapshot {
            local_id: self.local_id.clone(),
            mode: self.session.as_ref().map(|s| s.mode),
            room_id: self.session.as_ref().and_then(|s| s.room_id().cloned()),
            started_at: self.session.as_ref().map(|s| s.started_at),
            local_audio: stream.audio().is_some(),
            local_video: stream.video().is_some(),
            screen_sharing: self.pipeline.is_screen_sharing(),
            links,
        }
    }

    /// Apply one inbound relay event
    pub async fn handle_relay_event(&mut self, event: RelayEvent) {
        trace!(event = event.event_name(), "Relay event received");
        match Inbound::from(event) {
            Inbound::Signal(envelope) => self.on_signal(envelope).await,
            Inbound::Roster { room_id, participants } => {
                let Some(mesh) = self.session.as_mut().and_then(|s| s.mesh.as_mut()) else {
                    debug!(room = %room_id, "Roster outside a group call ignored");
                    return;
                };
                let outcome = mesh
                    .on_roster(
                        &room_id,
                        &participants,
                        &mut self.registry,
                        self.pipeline.stream(),
                        &self.relay,
                    )
                    .await;
                for (peer, error) in &outcome.failed {
                    self.events.publish_link_error(peer, error);
                }
            }
            Inbound::PeerJoined { user_id, username } => {
                let Some(mesh) = self.session.as_mut().and_then(|s| s.mesh.as_mut()) else {
                    debug!(peer = %user_id, "Peer joined outside a group call ignored");
                    return;
                };
                mesh.on_peer_joined(&user_id);
                self.events.peer_joined.publish(PeerJoinedEvent { user_id, username });
            }
            Inbound::PeerLeft { user_id } => {
                let Some(mesh) = self.session.as_mut().and_then(|s| s.mesh.as_mut()) else {
                    debug!(peer = %user_id, "Peer left outside a group call ignored");
                    return;
                };
                mesh.on_peer_left(&user_id, &mut self.registry).await;
                self.events.peer_left.publish(PeerLeftEvent { user_id });
            }
            Inbound::RemoteError { message } => {
                warn!(message = %message, "Relay reported an error");
                self.events.error.publish(CallErrorEvent::remote(message));
            }
        }
    }

    async fn on_signal(&mut self, envelope: SignalingEnvelope) {
        let peer = envelope.peer.clone();
        let is_offer = matches!(envelope.signal, SignalPayload::Offer(_));

        let active_remote = self.session.as_ref().map(|session| session.remote.clone());
        match active_remote {
            None if is_offer => {
                info!(peer = %peer, "Incoming call, opening receive-only session");
                self.session = Some(CallSession::direct(peer.clone()));
            }
            None => {
                debug!(peer = %peer, kind = %envelope.kind(), "Signal without a session dropped");
                return;
            }
            Some(Some(remote)) if remote != peer => {
                warn!(peer = %peer, active = %remote, "Signal from outside the direct call ignored");
                return;
            }
            Some(_) => {}
        }

        match protocol::handle_envelope(&mut self.registry, self.pipeline.stream(), &self.relay, envelope).await {
            Ok(outcome) => trace!(peer = %peer, outcome = ?outcome, "Signal handled"),
            Err(e) => {
                warn!(peer = %peer, error = %e, "Signal handling failed");
                self.events.publish_link_error(&peer, &e);
            }
        }
        self.publish_direct_state();
    }

    /// Apply one backend callback
    pub async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Link { peer, event } => {
                if !self.registry.contains(&peer) {
                    trace!(peer = %peer, "Callback for a closed link dropped");
                    return;
                }
                match event {
                    NativeEvent::IceCandidate(Some(candidate)) => {
                        self.relay
                            .send_signal(&peer, SignalPayload::IceCandidate(Some(candidate)))
                            .await;
                    }
                    NativeEvent::IceCandidate(None) => {
                        trace!(peer = %peer, "Candidate gathering complete");
                    }
                    NativeEvent::StateChanged(state) => self.on_native_state(&peer, state).await,
                    NativeEvent::RemoteTrack(track) => {
                        let Some(link) = self.registry.get_mut(&peer) else {
                            return;
                        };
                        debug!(peer = %peer, kind = %track.kind(), "Remote track arrived");
                        let stream = link.add_remote_track(track).clone();
                        self.events.remote_stream.publish(RemoteStreamEvent { user_id: peer, stream });
                    }
                }
            }
            EngineEvent::TrackEnded { track_id, status } => {
                let update = self
                    .pipeline
                    .on_track_finished(track_id, status, &mut self.registry, &self.relay)
                    .await;
                if let Some(update) = update {
                    if let Err(e) = self.apply_update(update) {
                        warn!(error = %e, "Restoring video after screen share failed");
                    }
                }
            }
        }
    }

    async fn on_native_state(&mut self, peer: &UserId, native: NativeConnectionState) {
        let to = match native {
            NativeConnectionState::Connecting => LinkState::Connecting,
            NativeConnectionState::Connected => LinkState::Connected,
            NativeConnectionState::Disconnected => LinkState::Disconnected,
            NativeConnectionState::Failed => LinkState::Failed,
            NativeConnectionState::New | NativeConnectionState::Closed => {
                debug!(peer = %peer, state = ?native, "Native state ignored");
                return;
            }
        };
        let Some(link) = self.registry.get_mut(peer) else {
            return;
        };
        if let Err(e) = link.transition(to) {
            debug!(peer = %peer, error = %e, "Native transition ignored");
            return;
        }

        if to == LinkState::Failed {
            self.publish_direct_state();
            let Some(link) = self.registry.get_mut(peer) else {
                return;
            };
            match self.health.recover(link, &self.relay).await {
                Ok(Recovery::Restarted) => warn!(peer = %peer, restarts = link.ice_restarts(), "Link failed, ICE restarted"),
                Ok(Recovery::GaveUp { restarts }) => {
                    let error = CallError::ConnectionFailed {
                        peer: peer.clone(),
                        restarts,
                    };
                    self.events.publish_error(&error);
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "ICE restart failed");
                    self.events.publish_link_error(peer, &e);
                }
            }
        }
        self.publish_direct_state();
    }

    /// Mirror the direct link's state on `connection_state`
    fn publish_direct_state(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(remote) = session.remote.as_ref() else {
            return;
        };
        let Some(link) = self.registry.get(remote) else {
            return;
        };
        if session.published_state == Some(link.state()) {
            return;
        }
        session.published_state = Some(link.state());
        self.events.connection_state.publish(ConnectionStateEvent {
            peer: remote.clone(),
            state: link.state(),
        });
    }
}
