//! Offer/answer signaling protocol
//!
//! Routes each inbound [`SignalingEnvelope`] to the link of its sender and
//! drives that link through establishment, renegotiation and ICE restart.
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


use meshcall_types::{SessionDescription, SignalPayload, SignalingEnvelope, UserId};
use tracing::{debug, info, warn};

use crate::error::CallResult;
use crate::link::{LinkRole, PeerLink, PendingOffer, SignalingState};
use crate::media::LocalStream;
use crate::registry::PeerRegistry;
use crate::relay_adapter::RelayAdapter;

/// What an inbound signal did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// An offer was answered; `created` when it opened a new responder link
    Answered { created: bool },
    AnswerApplied,
    CandidateAdded,
    /// Dropped without touching any link state
    Ignored,
}

/// Apply one inbound signal
pub async fn handle_envelope(
    registry: &mut PeerRegistry,
    local: &LocalStream,
    relay: &RelayAdapter,
    envelope: SignalingEnvelope,
) -> CallResult<SignalOutcome> {
    let SignalingEnvelope { peer, signal } = envelope;
    match signal {
        SignalPayload::Offer(offer) => handle_offer(registry, local, relay, &peer, offer).await,
        SignalPayload::Answer(answer) => {
            let Some(link) = registry.get_mut(&peer) else {
                debug!(peer = %peer, "Answer from unknown peer dropped");
                return Ok(SignalOutcome::Ignored);
            };
            if !link.accept_answer(answer).await? {
                warn!(
                    peer = %peer,
                    signaling = ?link.signaling_state(),
                    "Answer without a pending offer ignored"
                );
                return Ok(SignalOutcome::Ignored);
            }
            debug!(peer = %peer, "Remote answer applied");
            flush_pending(link, relay).await?;
            Ok(SignalOutcome::AnswerApplied)
        }
        SignalPayload::IceCandidate(candidate) => {
            let Some(link) = registry.get_mut(&peer) else {
                debug!(peer = %peer, "Candidate from unknown peer dropped");
                return Ok(SignalOutcome::Ignored);
            };
            match link.add_remote_candidate(candidate).await {
                Ok(true) => Ok(SignalOutcome::CandidateAdded),
                Ok(false) => Ok(SignalOutcome::Ignored),
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Remote candidate rejected");
                    Ok(SignalOutcome::Ignored)
                }
            }
        }
    }
}

async fn handle_offer(
    registry: &mut PeerRegistry,
    local: &LocalStream,
    relay: &RelayAdapter,
    peer: &UserId,
    offer: SessionDescription,
) -> CallResult<SignalOutcome> {
    let local_id = registry.local_id().clone();
    let created = registry.insert(peer, LinkRole::Responder, local)?;
    let link = registry.require_mut(peer)?;

    if link.signaling_state() == SignalingState::HaveLocalOffer {
        // Glare: the lower identity keeps its offer
        if local_id < *peer {
            info!(peer = %peer, "Offer collision, keeping local offer");
            return Ok(SignalOutcome::Ignored);
        }
        info!(peer = %peer, "Offer collision, yielding to remote offer");
        link.yield_to_remote().await?;
    }

    if !created {
        debug!(peer = %peer, "Renegotiation offer received");
    }
    let answer = link.accept_offer(offer).await?;
    relay.send_signal(peer, SignalPayload::Answer(answer)).await;
    flush_pending(link, relay).await?;
    Ok(SignalOutcome::Answered { created })
}

/// Offer the current track set to the peer.
///
/// Deferred until the link is stable when an exchange is in flight.
pub async fn renegotiate(link: &mut PeerLink, relay: &RelayAdapter) -> CallResult<()> {
    if link.signaling_state() != SignalingState::Stable {
        debug!(peer = %link.remote_id(), "Exchange in flight, renegotiation deferred");
        link.defer_offer(PendingOffer::Renegotiate);
        return Ok(());
    }
    let offer = link.create_offer(false).await?;
    relay.send_signal(link.remote_id(), SignalPayload::Offer(offer)).await;
    Ok(())
}

/// Renegotiate with fresh ICE credentials
pub async fn restart_ice(link: &mut PeerLink, relay: &RelayAdapter) -> CallResult<()> {
    match link.signaling_state() {
        SignalingState::HaveLocalOffer => link.rollback_local_offer().await?,
        SignalingState::HaveRemoteOffer => {
            debug!(peer = %link.remote_id(), "Exchange in flight, ICE restart deferred");
            link.defer_offer(PendingOffer::IceRestart);
            return Ok(());
        }
        SignalingState::Stable => {}
    }
    let offer = link.create_offer(true).await?;
    info!(peer = %link.remote_id(), restarts = link.ice_restarts(), "ICE restart offer sent");
    relay.send_signal(link.remote_id(), SignalPayload::Offer(offer)).await;
    Ok(())
}

async fn flush_pending(link: &mut PeerLink, relay: &RelayAdapter) -> CallResult<()> {
    match link.take_pending_offer() {
        Some(PendingOffer::Renegotiate) => renegotiate(link, relay).await,
        Some(PendingOffer::IceRestart) => restart_ice(link, relay).await,
        None => Ok(()),
    }
}
