//! Signaling relay adapter
//!
//! Thin pass-through between the engine and a [`SignalingRelay`]: outbound
//! protocol actions become relay commands, inbound relay events become
//! typed [`Inbound`] values.
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


use meshcall_types::{Participant, RelayCommand, RelayEvent, RoomId, SignalPayload, SignalingEnvelope, UserId};
use signaling_relay_client::{RelayEventStream, SignalingRelay};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{CallError, CallResult};

/// Inbound relay traffic, classified
#[derive(Debug, Clone)]
pub enum Inbound {
    Signal(SignalingEnvelope),
    Roster {
        room_id: RoomId,
        participants: Vec<Participant>,
    },
    PeerJoined {
        user_id: UserId,
        username: Option<String>,
    },
    PeerLeft {
        user_id: UserId,
    },
    RemoteError {
        message: String,
    },
}

impl From<RelayEvent> for Inbound {
    fn from(event: RelayEvent) -> Self {
        match event {
            RelayEvent::Signal { sender_id, signal } => {
                Inbound::Signal(SignalingEnvelope::new(sender_id, signal))
            }
            RelayEvent::RoomJoined { room_id, participants } => Inbound::Roster { room_id, participants },
            RelayEvent::NewPeer { user_id, username } => Inbound::PeerJoined { user_id, username },
            RelayEvent::PeerLeft { user_id } => Inbound::PeerLeft { user_id },
            RelayEvent::CallError { message } => Inbound::RemoteError { message },
        }
    }
}

#[derive(Clone)]
pub struct RelayAdapter {
    relay: Arc<dyn SignalingRelay>,
}

impl RelayAdapter {
    pub fn new(relay: Arc<dyn SignalingRelay>) -> Self {
        RelayAdapter { relay }
    }

    pub fn local_user(&self) -> &UserId {
        self.relay.local_user()
    }

    /// Send one signal, surfacing a failure as `SignalingSendFailure`
    pub async fn try_send_signal(&self, target: &UserId, signal: SignalPayload) -> CallResult<()> {
        let kind = signal.kind();
        let command = RelayCommand::Signal {
            target_user_id: target.clone(),
            signal,
        };
        self.relay
            .send(&command)
            .await
            .map_err(|e| CallError::SignalingSendFailure {
                peer: target.clone(),
                reason: e.to_string(),
            })?;
        debug!(peer = %target, kind = %kind, "Signal sent");
        Ok(())
    }

    /// Send one signal; a failure is logged and otherwise ignored, the link
    /// will surface it later as an ICE failure
    pub async fn send_signal(&self, target: &UserId, signal: SignalPayload) -> bool {
        match self.try_send_signal(target, signal).await {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %target, error = %e, "Dropping signal the relay did not accept");
                false
            }
        }
    }

    pub async fn join_group(&self, room_id: &RoomId) -> CallResult<()> {
        self.relay
            .send(&RelayCommand::JoinGroup {
                room_id: room_id.clone(),
            })
            .await?;
        Ok(())
    }

    pub async fn leave_group(&self, room_id: &RoomId) -> CallResult<()> {
        self.relay
            .send(&RelayCommand::LeaveGroup {
                room_id: room_id.clone(),
            })
            .await?;
        Ok(())
    }

    pub async fn invite(&self, room_id: &RoomId, target: &UserId) -> CallResult<()> {
        self.relay
            .send(&RelayCommand::Invite {
                room_id: room_id.clone(),
                target_user_id: target.clone(),
            })
            .await?;
        Ok(())
    }

    pub async fn subscribe(&self) -> CallResult<RelayEventStream> {
        Ok(self.relay.subscribe().await?)
    }

    pub async fn is_connected(&self) -> bool {
        self.relay.is_connected().await
    }
}
