//! Per-peer link state machine
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


use meshcall_types::{IceCandidateInit, SessionDescription, UserId};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::{OfferOptions, PeerConnection, SenderInfo};
use crate::error::{CallError, CallResult};
use crate::media::{LocalStream, MediaKind, MediaTrack, RemoteStream};

/// Link lifecycle
///
/// `new -> connecting -> connected`, `connected <-> disconnected`,
/// any `-> failed -> connecting` (ICE restart), any `-> closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    /// Terminal; only reached by explicit teardown
    Closed,
}

impl LinkState {
    pub fn can_transition_to(self, to: LinkState) -> bool {
        use LinkState::*;
        match (self, to) {
            (Closed, _) => false,
            (_, Closed) | (_, Failed) => true,
            (New, Connecting)
            | (Connecting, Connected)
            | (Connecting, Disconnected)
            | (Connected, Disconnected)
            | (Disconnected, Connected)
            | (Disconnected, Connecting)
            | (Failed, Connecting) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::New => "new",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side produced the first offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkRole {
    Initiator,
    Responder,
}

/// Offer/answer state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// Offer owed to the peer once the exchange in flight completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingOffer {
    Renegotiate,
    IceRestart,
}

/// One connection to a remote participant
pub struct PeerLink {
    link_id: Uuid,
    remote_id: UserId,
    role: LinkRole,
    state: LinkState,
    signaling: SignalingState,
    connection: Box<dyn PeerConnection>,
    remote_stream: RemoteStream,
    ice_restarts: u32,
    offers_sent: u32,
    pending_offer: Option<PendingOffer>,
}

impl PeerLink {
    pub(crate) fn new(remote_id: UserId, role: LinkRole, connection: Box<dyn PeerConnection>) -> Self {
        PeerLink {
            link_id: Uuid::new_v4(),
            remote_stream: RemoteStream::new(remote_id.clone()),
            remote_id,
            role,
            state: LinkState::New,
            signaling: SignalingState::Stable,
            connection,
            ice_restarts: 0,
            offers_sent: 0,
            pending_offer: None,
        }
    }

    pub fn link_id(&self) -> Uuid {
        self.link_id
    }

    pub fn remote_id(&self) -> &UserId {
        &self.remote_id
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling
    }

    pub fn remote_stream(&self) -> &RemoteStream {
        &self.remote_stream
    }

    pub fn ice_restarts(&self) -> u32 {
        self.ice_restarts
    }

    /// Offers produced for this peer, ICE restarts included
    pub fn offers_sent(&self) -> u32 {
        self.offers_sent
    }

    pub fn senders(&self) -> Vec<SenderInfo> {
        self.connection.senders()
    }

    pub(crate) fn connection(&self) -> &dyn PeerConnection {
        self.connection.as_ref()
    }

    /// Add every local track as a fresh sender
    pub(crate) fn attach(&mut self, stream: &LocalStream) -> CallResult<()> {
        for track in stream.tracks() {
            self.connection.add_track(track)?;
        }
        Ok(())
    }

    /// Apply a state change; same-state updates are no-ops
    pub(crate) fn transition(&mut self, to: LinkState) -> CallResult<()> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition_to(to) {
            return Err(CallError::InvalidTransition {
                peer: self.remote_id.clone(),
                from: self.state,
                to,
            });
        }
        debug!(peer = %self.remote_id, from = %self.state, to = %to, "Link state transition");
        self.state = to;
        Ok(())
    }

    /// Produce and apply a local offer
    pub(crate) async fn create_offer(&mut self, ice_restart: bool) -> CallResult<SessionDescription> {
        if self.signaling != SignalingState::Stable {
            return Err(CallError::InvalidSignalingState {
                peer: self.remote_id.clone(),
                reason: format!("cannot offer in {:?}", self.signaling),
            });
        }

        let offer_failure = |e: CallError| CallError::OfferCreationFailure {
            peer: self.remote_id.clone(),
            reason: e.to_string(),
        };
        let offer = self
            .connection
            .create_offer(OfferOptions { ice_restart })
            .await
            .map_err(offer_failure)?;
        self.connection
            .set_local_description(offer.clone())
            .await
            .map_err(offer_failure)?;

        self.signaling = SignalingState::HaveLocalOffer;
        self.offers_sent += 1;
        if ice_restart {
            self.ice_restarts += 1;
        }
        if matches!(self.state, LinkState::New | LinkState::Failed) {
            self.transition(LinkState::Connecting)?;
        }
        Ok(offer)
    }

    /// Apply a remote offer and produce the answer to send back
    pub(crate) async fn accept_offer(&mut self, offer: SessionDescription) -> CallResult<SessionDescription> {
        if self.signaling != SignalingState::Stable {
            return Err(CallError::InvalidSignalingState {
                peer: self.remote_id.clone(),
                reason: format!("cannot accept an offer in {:?}", self.signaling),
            });
        }

        let answer_failure = |e: CallError| CallError::AnswerCreationFailure {
            peer: self.remote_id.clone(),
            reason: e.to_string(),
        };
        self.connection
            .set_remote_description(offer)
            .await
            .map_err(answer_failure)?;
        self.signaling = SignalingState::HaveRemoteOffer;

        let answer = match answer_remote_offer(self.connection.as_mut()).await {
            Ok(answer) => answer,
            Err(e) => {
                if let Err(rollback) = self.connection.rollback().await {
                    warn!(peer = %self.remote_id, error = %rollback, "Rollback after answer failure failed");
                }
                self.signaling = SignalingState::Stable;
                return Err(answer_failure(e));
            }
        };
        self.signaling = SignalingState::Stable;

        if self.state == LinkState::New {
            self.transition(LinkState::Connecting)?;
        }
        Ok(answer)
    }

    /// Apply a remote answer. Returns false when no offer is pending.
    pub(crate) async fn accept_answer(&mut self, answer: SessionDescription) -> CallResult<bool> {
        if self.signaling != SignalingState::HaveLocalOffer {
            return Ok(false);
        }
        self.connection.set_remote_description(answer).await?;
        self.signaling = SignalingState::Stable;
        Ok(true)
    }

    /// Drop the pending local offer
    pub(crate) async fn rollback_local_offer(&mut self) -> CallResult<()> {
        if self.signaling == SignalingState::HaveLocalOffer {
            self.connection.rollback().await?;
            self.signaling = SignalingState::Stable;
        }
        Ok(())
    }

    /// Lose a glare: discard our offer and take the responder role
    pub(crate) async fn yield_to_remote(&mut self) -> CallResult<()> {
        self.rollback_local_offer().await?;
        self.role = LinkRole::Responder;
        Ok(())
    }

    /// Returns false for the end-of-candidates marker
    pub(crate) async fn add_remote_candidate(&mut self, candidate: Option<IceCandidateInit>) -> CallResult<bool> {
        match candidate {
            Some(candidate) if !candidate.is_empty() => {
                self.connection.add_ice_candidate(candidate).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn add_remote_track(&mut self, track: MediaTrack) -> &RemoteStream {
        self.remote_stream.add_track(track);
        &self.remote_stream
    }

    /// Send `track` on the sender of its kind.
    ///
    /// Replaces in place when a sender exists; otherwise adds a sender and
    /// returns true, meaning the link needs renegotiation.
    pub(crate) async fn push_track(&mut self, kind: MediaKind, track: Option<MediaTrack>) -> CallResult<bool> {
        let has_sender = self.connection.senders().iter().any(|s| s.kind == kind);
        if has_sender {
            self.connection.replace_track(kind, track).await?;
            return Ok(false);
        }
        match track {
            Some(track) => {
                self.connection.add_track(track)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn drop_track(&mut self, kind: MediaKind) -> CallResult<()> {
        self.connection.remove_track(kind)
    }

    /// Owe the peer an offer; an owed ICE restart is never downgraded
    pub(crate) fn defer_offer(&mut self, offer: PendingOffer) {
        if self.pending_offer != Some(PendingOffer::IceRestart) {
            self.pending_offer = Some(offer);
        }
    }

    pub(crate) fn take_pending_offer(&mut self) -> Option<PendingOffer> {
        self.pending_offer.take()
    }

    pub(crate) async fn close(&mut self) {
        self.connection.close().await;
        self.state = LinkState::Closed;
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("link_id", &self.link_id)
            .field("remote_id", &self.remote_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("signaling", &self.signaling)
            .field("ice_restarts", &self.ice_restarts)
            .finish()
    }
}

async fn answer_remote_offer(connection: &mut dyn PeerConnection) -> CallResult<SessionDescription> {
    let answer = connection.create_answer().await?;
    connection.set_local_description(answer.clone()).await?;
    Ok(answer)
}
