//! In-process signaling relay hub
//!
//! Routes signals between users of the same process and keeps room
//! rosters the way the production relay does. Used by the demo binary and
//! by tests that need several call engines talking to each other.
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
use meshcall_types::{Participant, RelayCommand, RelayEvent, RoomId, SignalKind, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::traits::{RelayEventStream, SignalingRelay};

type Inbox = mpsc::UnboundedSender<Result<RelayEvent>>;

/// A command accepted by the hub, in send order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub from: UserId,
    pub command: RelayCommand,
}

#[derive(Default)]
struct HubState {
    inboxes: HashMap<UserId, Inbox>,
    usernames: HashMap<UserId, String>,
    /// Members per room in join order
    rooms: HashMap<RoomId, Vec<UserId>>,
    unreachable: HashSet<UserId>,
    sent: Vec<SentCommand>,
}

impl HubState {
    fn deliver(&self, to: &UserId, event: RelayEvent) -> bool {
        match self.inboxes.get(to) {
            Some(inbox) => inbox.send(Ok(event)).is_ok(),
            None => {
                debug!(user = %to, event = event.event_name(), "Dropping event for unknown user");
                false
            }
        }
    }

    fn participant(&self, user_id: &UserId) -> Participant {
        Participant {
            user_id: user_id.clone(),
            username: self.usernames.get(user_id).cloned(),
        }
    }

    fn route(&mut self, from: &UserId, command: &RelayCommand) -> Result<()> {
        if self.unreachable.contains(from) {
            return Err(RelayError::Unreachable(from.clone()));
        }

        self.sent.push(SentCommand {
            from: from.clone(),
            command: command.clone(),
        });

        match command {
            RelayCommand::Signal { target_user_id, signal } => {
                self.deliver(
                    target_user_id,
                    RelayEvent::Signal {
                        sender_id: from.clone(),
                        signal: signal.clone(),
                    },
                );
            }
            RelayCommand::JoinGroup { room_id } => self.join(from, room_id),
            RelayCommand::LeaveGroup { room_id } => self.leave(from, room_id),
            RelayCommand::Invite { room_id, target_user_id } => {
                info!(from = %from, target = %target_user_id, room = %room_id, "Invite recorded");
            }
        }

        Ok(())
    }

    fn join(&mut self, user_id: &UserId, room_id: &RoomId) {
        let existing: Vec<UserId> = self
            .rooms
            .get(room_id)
            .map(|members| members.iter().filter(|m| *m != user_id).cloned().collect())
            .unwrap_or_default();
        let already_member = self
            .rooms
            .get(room_id)
            .map(|members| members.contains(user_id))
            .unwrap_or(false);

        let roster = RelayEvent::RoomJoined {
            room_id: room_id.clone(),
            participants: existing.iter().map(|m| self.participant(m)).collect(),
        };
        self.deliver(user_id, roster);

        if already_member {
            return;
        }

        let username = self.usernames.get(user_id).cloned();
        for member in &existing {
            self.deliver(
                member,
                RelayEvent::NewPeer {
                    user_id: user_id.clone(),
                    username: username.clone(),
                },
            );
        }
        self.rooms.entry(room_id.clone()).or_default().push(user_id.clone());

        info!(user = %user_id, room = %room_id, existing = existing.len(), "User joined room");
    }

    fn leave(&mut self, user_id: &UserId, room_id: &RoomId) {
        let Some(members) = self.rooms.get_mut(room_id) else {
            return;
        };
        let before = members.len();
        members.retain(|m| m != user_id);
        if members.len() == before {
            return;
        }

        let remaining = members.clone();
        if remaining.is_empty() {
            self.rooms.remove(room_id);
        }
        for member in &remaining {
            self.deliver(member, RelayEvent::PeerLeft { user_id: user_id.clone() });
        }

        info!(user = %user_id, room = %room_id, remaining = remaining.len(), "User left room");
    }
}

/// In-process relay shared by every connected user
#[derive(Clone, Default)]
pub struct InMemoryRelayHub {
    state: Arc<Mutex<HubState>>,
}

impl InMemoryRelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return its relay client.
    ///
    /// Connecting an already connected user replaces its inbox.
    pub async fn connect(&self, user_id: UserId) -> InMemoryRelay {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.inboxes.insert(user_id.clone(), tx);

        InMemoryRelay {
            hub: self.clone(),
            user_id,
            inbox: Mutex::new(Some(rx)),
        }
    }

    /// Register a user with a display name shown to room members
    pub async fn connect_with_name(&self, user_id: UserId, username: impl Into<String>) -> InMemoryRelay {
        self.state
            .lock()
            .await
            .usernames
            .insert(user_id.clone(), username.into());
        self.connect(user_id).await
    }

    /// Make sends from `user_id` fail, as if the relay were unreachable
    pub async fn set_reachable(&self, user_id: &UserId, reachable: bool) {
        let mut state = self.state.lock().await;
        if reachable {
            state.unreachable.remove(user_id);
        } else {
            state.unreachable.insert(user_id.clone());
        }
    }

    /// Drop a user: leaves every room and closes its inbox
    pub async fn disconnect(&self, user_id: &UserId) {
        let mut state = self.state.lock().await;
        let rooms: Vec<RoomId> = state
            .rooms
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .map(|(room, _)| room.clone())
            .collect();
        for room in rooms {
            state.leave(user_id, &room);
        }
        state.inboxes.remove(user_id);
    }

    /// Deliver an arbitrary event to a user
    pub async fn inject(&self, to: &UserId, event: RelayEvent) -> bool {
        self.state.lock().await.deliver(to, event)
    }

    /// Every command accepted so far
    pub async fn sent(&self) -> Vec<SentCommand> {
        self.state.lock().await.sent.clone()
    }

    /// Number of signals of `kind` sent from `from` to `to`
    pub async fn signals_between(&self, from: &UserId, to: &UserId, kind: SignalKind) -> usize {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .filter(|sent| {
                &sent.from == from
                    && matches!(
                        &sent.command,
                        RelayCommand::Signal { target_user_id, signal }
                            if target_user_id == to && signal.kind() == kind
                    )
            })
            .count()
    }

    /// Current members of a room in join order
    pub async fn room_members(&self, room_id: &RoomId) -> Vec<UserId> {
        self.state
            .lock()
            .await
            .rooms
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Relay client bound to one user of an [`InMemoryRelayHub`]
pub struct InMemoryRelay {
    hub: InMemoryRelayHub,
    user_id: UserId,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Result<RelayEvent>>>>,
}

impl InMemoryRelay {
    pub fn hub(&self) -> &InMemoryRelayHub {
        &self.hub
    }
}

#[async_trait]
impl SignalingRelay for InMemoryRelay {
    async fn send(&self, command: &RelayCommand) -> Result<()> {
        let result = self.hub.state.lock().await.route(&self.user_id, command);
        if let Err(ref e) = result {
            warn!(user = %self.user_id, event = command.event_name(), error = %e, "Relay send failed");
        }
        result
    }

    async fn subscribe(&self) -> Result<RelayEventStream> {
        let rx = self
            .inbox
            .lock()
            .await
            .take()
            .ok_or_else(|| RelayError::Subscribe(format!("inbox of {} already subscribed", self.user_id)))?;

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn local_user(&self) -> &UserId {
        &self.user_id
    }

    async fn is_connected(&self) -> bool {
        let state = self.hub.state.lock().await;
        state.inboxes.contains_key(&self.user_id) && !state.unreachable.contains(&self.user_id)
    }

    fn client_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use meshcall_types::{SessionDescription, SignalPayload};

    async fn next_event(stream: &mut RelayEventStream) -> RelayEvent {
        stream.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_signal_is_stamped_with_sender() {
        let hub = InMemoryRelayHub::new();
        let alice = hub.connect(UserId::new("alice")).await;
        let bob = hub.connect(UserId::new("bob")).await;
        let mut bob_inbox = bob.subscribe().await.unwrap();

        alice
            .send(&RelayCommand::Signal {
                target_user_id: UserId::new("bob"),
                signal: SignalPayload::Offer(SessionDescription::offer("v=0")),
            })
            .await
            .unwrap();

        match next_event(&mut bob_inbox).await {
            RelayEvent::Signal { sender_id, signal } => {
                assert_eq!(sender_id, UserId::new("alice"));
                assert_eq!(signal.kind(), SignalKind::Offer);
            }
            other => panic!("Expected signal, got {:?}", other),
        }
        assert_eq!(
            hub.signals_between(&UserId::new("alice"), &UserId::new("bob"), SignalKind::Offer).await,
            1
        );
    }

    #[tokio::test]
    async fn test_room_roster_and_notifications() {
        let hub = InMemoryRelayHub::new();
        let room = RoomId::new("standup");
        let alice = hub.connect(UserId::new("alice")).await;
        let bob = hub.connect_with_name(UserId::new("bob"), "Bob").await;
        let mut alice_inbox = alice.subscribe().await.unwrap();
        let mut bob_inbox = bob.subscribe().await.unwrap();

        alice.send(&RelayCommand::JoinGroup { room_id: room.clone() }).await.unwrap();
        assert_eq!(
            next_event(&mut alice_inbox).await,
            RelayEvent::RoomJoined {
                room_id: room.clone(),
                participants: vec![]
            }
        );

        bob.send(&RelayCommand::JoinGroup { room_id: room.clone() }).await.unwrap();
        match next_event(&mut bob_inbox).await {
            RelayEvent::RoomJoined { participants, .. } => {
                assert_eq!(participants, vec![Participant::new(UserId::new("alice"))]);
            }
            other => panic!("Expected roster, got {:?}", other),
        }
        assert_eq!(
            next_event(&mut alice_inbox).await,
            RelayEvent::NewPeer {
                user_id: UserId::new("bob"),
                username: Some("Bob".to_string())
            }
        );

        bob.send(&RelayCommand::LeaveGroup { room_id: room.clone() }).await.unwrap();
        assert_eq!(
            next_event(&mut alice_inbox).await,
            RelayEvent::PeerLeft {
                user_id: UserId::new("bob")
            }
        );
        assert_eq!(hub.room_members(&room).await, vec![UserId::new("alice")]);
    }

    #[tokio::test]
    async fn test_unreachable_sender_fails() {
        let hub = InMemoryRelayHub::new();
        let alice = hub.connect(UserId::new("alice")).await;
        hub.set_reachable(&UserId::new("alice"), false).await;

        let result = alice
            .send(&RelayCommand::JoinGroup {
                room_id: RoomId::new("r"),
            })
            .await;
        assert!(matches!(result, Err(RelayError::Unreachable(_))));
        assert!(!alice.is_connected().await);
        assert!(hub.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_single_subscription() {
        let hub = InMemoryRelayHub::new();
        let alice = hub.connect(UserId::new("alice")).await;
        assert!(alice.subscribe().await.is_ok());
        assert!(alice.subscribe().await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_room() {
        let hub = InMemoryRelayHub::new();
        let room = RoomId::new("r");
        let alice = hub.connect(UserId::new("alice")).await;
        let bob = hub.connect(UserId::new("bob")).await;
        let mut alice_inbox = alice.subscribe().await.unwrap();

        alice.send(&RelayCommand::JoinGroup { room_id: room.clone() }).await.unwrap();
        bob.send(&RelayCommand::JoinGroup { room_id: room.clone() }).await.unwrap();
        hub.disconnect(&UserId::new("bob")).await;

        let _roster = next_event(&mut alice_inbox).await;
        let _joined = next_event(&mut alice_inbox).await;
        assert_eq!(
            next_event(&mut alice_inbox).await,
            RelayEvent::PeerLeft {
                user_id: UserId::new("bob")
            }
        );
    }
}
