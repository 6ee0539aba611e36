//! Peer connection registry
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


use meshcall_types::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{EngineEventSender, LinkEventSink, PeerConnectionFactory};
use crate::error::{CallError, CallResult};
use crate::link::{LinkRole, PeerLink};
use crate::media::{LocalStream, MediaKind, MediaTrack};
use crate::protocol;
use crate::relay_adapter::RelayAdapter;

/// Result of [`PeerRegistry::get_or_create`]
#[derive(Debug)]
pub enum ProvisionOutcome {
    /// A link already existed; nothing was done
    Existing,
    Created,
    /// Link created as initiator but its first offer could not be produced
    CreatedWithoutOffer(CallError),
}

/// Links that need renegotiation and links that failed, after a track push
#[derive(Debug, Default)]
pub struct TrackPush {
    pub renegotiate: Vec<UserId>,
    pub failed: Vec<(UserId, CallError)>,
}

/// Owner of every [`PeerLink`] in the session, keyed by remote identity
pub struct PeerRegistry {
    local_id: UserId,
    factory: Arc<dyn PeerConnectionFactory>,
    ice_servers: Vec<String>,
    engine_tx: EngineEventSender,
    links: HashMap<UserId, PeerLink>,
}

impl PeerRegistry {
    pub fn new(
        local_id: UserId,
        factory: Arc<dyn PeerConnectionFactory>,
        ice_servers: Vec<String>,
        engine_tx: EngineEventSender,
    ) -> Self {
        PeerRegistry {
            local_id,
            factory,
            ice_servers,
            engine_tx,
            links: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &UserId {
        &self.local_id
    }

    /// Insert a link for `remote` unless one exists. Returns whether it was
    /// created. No await happens between the check and the insertion.
    pub(crate) fn insert(&mut self, remote: &UserId, role: LinkRole, local: &LocalStream) -> CallResult<bool> {
        if self.links.contains_key(remote) {
            return Ok(false);
        }

        let sink = LinkEventSink::new(remote.clone(), self.engine_tx.clone());
        let connection = self
            .factory
            .create(&self.local_id, remote, &self.ice_servers, sink)?;
        let mut link = PeerLink::new(remote.clone(), role, connection);
        link.attach(local)?;

        info!(peer = %remote, role = ?role, link_id = %link.link_id(), "Peer link created");
        self.links.insert(remote.clone(), link);
        Ok(true)
    }

    /// Return the link for `remote`, creating it when missing.
    ///
    /// The first creation fixes the role; an initiator immediately offers.
    pub async fn get_or_create(
        &mut self,
        remote: &UserId,
        as_initiator: bool,
        local: &LocalStream,
        relay: &RelayAdapter,
    ) -> CallResult<ProvisionOutcome> {
        let role = if as_initiator {
            LinkRole::Initiator
        } else {
            LinkRole::Responder
        };

        if !self.insert(remote, role, local)? {
            debug!(peer = %remote, "Peer link already exists");
            return Ok(ProvisionOutcome::Existing);
        }
        if !as_initiator {
            return Ok(ProvisionOutcome::Created);
        }

        let link = self.require_mut(remote)?;
        match protocol::renegotiate(link, relay).await {
            Ok(()) => Ok(ProvisionOutcome::Created),
            Err(e) => {
                warn!(peer = %remote, error = %e, "Initial offer failed");
                Ok(ProvisionOutcome::CreatedWithoutOffer(e))
            }
        }
    }

    pub fn get(&self, remote: &UserId) -> Option<&PeerLink> {
        self.links.get(remote)
    }

    pub(crate) fn get_mut(&mut self, remote: &UserId) -> Option<&mut PeerLink> {
        self.links.get_mut(remote)
    }

    pub(crate) fn require_mut(&mut self, remote: &UserId) -> CallResult<&mut PeerLink> {
        self.links
            .get_mut(remote)
            .ok_or_else(|| CallError::LinkNotFound { peer: remote.clone() })
    }

    pub fn contains(&self, remote: &UserId) -> bool {
        self.links.contains_key(remote)
    }

    /// Close and remove a link. Returns false when there was none.
    pub async fn teardown(&mut self, remote: &UserId) -> bool {
        match self.links.remove(remote) {
            Some(mut link) => {
                link.close().await;
                info!(peer = %remote, "Peer link closed");
                true
            }
            None => {
                debug!(peer = %remote, "No link to tear down");
                false
            }
        }
    }

    pub async fn teardown_all(&mut self) -> usize {
        let peers = self.ids();
        for peer in &peers {
            self.teardown(peer).await;
        }
        peers.len()
    }

    /// Feed `track` to the `kind` sender of every link
    pub(crate) async fn push_to_all(&mut self, kind: MediaKind, track: Option<MediaTrack>) -> TrackPush {
        let mut outcome = TrackPush::default();
        for (peer, link) in self.links.iter_mut() {
            match link.push_track(kind, track.clone()).await {
                Ok(true) => outcome.renegotiate.push(peer.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(peer = %peer, kind = %kind, error = %e, "Track update failed on link");
                    outcome.failed.push((peer.clone(), e));
                }
            }
        }
        outcome
    }

    /// Remove the `kind` sender from every link
    pub(crate) fn remove_from_all(&mut self, kind: MediaKind) -> Vec<(UserId, CallError)> {
        let mut failed = Vec::new();
        for (peer, link) in self.links.iter_mut() {
            if let Err(e) = link.drop_track(kind) {
                warn!(peer = %peer, kind = %kind, error = %e, "Track removal failed on link");
                failed.push((peer.clone(), e));
            }
        }
        failed
    }

    /// Send a fresh offer on each named link
    pub(crate) async fn renegotiate(&mut self, peers: &[UserId], relay: &RelayAdapter) -> Vec<(UserId, CallError)> {
        let mut failed = Vec::new();
        for peer in peers {
            let Some(link) = self.links.get_mut(peer) else {
                continue;
            };
            if let Err(e) = protocol::renegotiate(link, relay).await {
                warn!(peer = %peer, error = %e, "Renegotiation failed");
                failed.push((peer.clone(), e));
            }
        }
        failed
    }

    /// Remote identities in sorted order
    pub fn ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.links.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
