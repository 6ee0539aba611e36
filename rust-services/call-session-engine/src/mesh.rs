//! Full-mesh group call coordination
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


use meshcall_types::{Participant, RoomId, UserId};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::error::{CallError, CallResult};
use crate::media::LocalStream;
use crate::registry::{PeerRegistry, ProvisionOutcome};
use crate::relay_adapter::RelayAdapter;

/// Links opened in response to a roster
#[derive(Debug, Default)]
pub struct RosterOutcome {
    pub initiated: Vec<UserId>,
    pub failed: Vec<(UserId, CallError)>,
}

/// Tracks one room and applies the join-order initiator rule: a newcomer
/// offers to everyone already present and waits for everyone after it.
#[derive(Debug)]
pub struct MeshCoordinator {
    room_id: RoomId,
    participants: BTreeSet<UserId>,
}

impl MeshCoordinator {
    pub fn new(room_id: RoomId) -> Self {
        MeshCoordinator {
            room_id,
            participants: BTreeSet::new(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Remote participants currently known
    pub fn participants(&self) -> impl Iterator<Item = &UserId> {
        self.participants.iter()
    }

    pub async fn join(&self, relay: &RelayAdapter) -> CallResult<()> {
        relay.join_group(&self.room_id).await?;
        info!(room = %self.room_id, "Join announced");
        Ok(())
    }

    /// Initiate a link to every participant already in the room
    pub async fn on_roster(
        &mut self,
        room_id: &RoomId,
        roster: &[Participant],
        registry: &mut PeerRegistry,
        local: &LocalStream,
        relay: &RelayAdapter,
    ) -> RosterOutcome {
        let mut outcome = RosterOutcome::default();
        if *room_id != self.room_id {
            warn!(room = %room_id, active = %self.room_id, "Roster for another room ignored");
            return outcome;
        }

        for participant in roster {
            let peer = &participant.user_id;
            if peer == registry.local_id() {
                continue;
            }
            self.participants.insert(peer.clone());
            match registry.get_or_create(peer, true, local, relay).await {
                Ok(ProvisionOutcome::Created) => outcome.initiated.push(peer.clone()),
                Ok(ProvisionOutcome::Existing) => {}
                Ok(ProvisionOutcome::CreatedWithoutOffer(e)) | Err(e) => {
                    warn!(room = %self.room_id, peer = %peer, error = %e, "Could not initiate link");
                    outcome.failed.push((peer.clone(), e));
                }
            }
        }

        info!(
            room = %self.room_id,
            participants = roster.len(),
            initiated = outcome.initiated.len(),
            "Roster processed"
        );
        outcome
    }

    /// A newcomer will offer to us; only remember it
    pub fn on_peer_joined(&mut self, user_id: &UserId) -> bool {
        info!(room = %self.room_id, peer = %user_id, "Peer joined");
        self.participants.insert(user_id.clone())
    }

    /// Tear down the departed peer's link
    pub async fn on_peer_left(&mut self, user_id: &UserId, registry: &mut PeerRegistry) -> bool {
        self.participants.remove(user_id);
        let closed = registry.teardown(user_id).await;
        info!(room = %self.room_id, peer = %user_id, closed, "Peer left");
        closed
    }

    pub async fn leave(&mut self, relay: &RelayAdapter) -> CallResult<()> {
        self.participants.clear();
        relay.leave_group(&self.room_id).await
    }
}
