//! Signaling relay command and event schemas
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


use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::{RoomId, UserId};
use crate::signaling::SignalPayload;

/// Messages sent to the signaling relay, addressed by target user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RelayCommand {
    Signal {
        #[serde(rename = "targetUserId")]
        target_user_id: UserId,
        signal: SignalPayload,
    },
    JoinGroup {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    LeaveGroup {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    Invite {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "targetUserId")]
        target_user_id: UserId,
    },
}

impl RelayCommand {
    /// Relay event name of this command
    pub fn event_name(&self) -> &'static str {
        match self {
            RelayCommand::Signal { .. } => "signal",
            RelayCommand::JoinGroup { .. } => "join-group",
            RelayCommand::LeaveGroup { .. } => "leave-group",
            RelayCommand::Invite { .. } => "invite",
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Room participant listed in a roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Participant {
    pub fn new(user_id: UserId) -> Self {
        Participant {
            user_id,
            username: None,
        }
    }
}

/// Messages delivered by the signaling relay, stamped with the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RelayEvent {
    Signal {
        #[serde(rename = "senderId")]
        sender_id: UserId,
        signal: SignalPayload,
    },
    /// Roster of the participants already present when we joined
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        participants: Vec<Participant>,
    },
    NewPeer {
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(default)]
        username: Option<String>,
    },
    PeerLeft {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    CallError {
        message: String,
    },
}

impl RelayEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            RelayEvent::Signal { .. } => "signal",
            RelayEvent::RoomJoined { .. } => "room-joined",
            RelayEvent::NewPeer { .. } => "new-peer",
            RelayEvent::PeerLeft { .. } => "peer-left",
            RelayEvent::CallError { .. } => "call-error",
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
