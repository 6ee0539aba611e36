//! Outbound event bus
//!
//! One typed broadcast topic per notification kind. Events are
//! fire-and-forget: publishing with no subscriber drops the event.
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
use meshcall_types::UserId;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{CallError, CallErrorKind};
use crate::link::LinkState;
use crate::media::{LocalStream, RemoteStream};

/// A stream arrived or changed for a remote participant
#[derive(Debug, Clone)]
pub struct RemoteStreamEvent {
    pub user_id: UserId,
    pub stream: RemoteStream,
}

/// State of the single link of a 1:1 call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStateEvent {
    pub peer: UserId,
    pub state: LinkState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerJoinedEvent {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLeftEvent {
    pub user_id: UserId,
}

/// Error surfaced to the UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallErrorEvent {
    pub kind: CallErrorKind,
    /// Link the error belongs to; `None` for session-scoped errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<UserId>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl CallErrorEvent {
    pub fn from_error(error: &CallError) -> Self {
        CallErrorEvent {
            kind: error.kind(),
            peer: error.peer().cloned(),
            message: error.to_string(),
            occurred_at: Utc::now(),
        }
    }

    /// Error raised while acting on one link
    pub fn for_link(peer: &UserId, error: &CallError) -> Self {
        CallErrorEvent {
            peer: Some(peer.clone()),
            ..Self::from_error(error)
        }
    }

    /// Error reported by the relay itself
    pub fn remote(message: impl Into<String>) -> Self {
        CallErrorEvent {
            kind: CallErrorKind::Remote,
            peer: None,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn is_session_scoped(&self) -> bool {
        self.peer.is_none()
    }
}

/// Single-kind broadcast channel
#[derive(Debug, Clone)]
pub struct Topic<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Topic<T> {
    fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Topic { tx }
    }

    pub fn publish(&self, event: T) {
        // No subscribers is normal
        let _ = self.tx.send(event);
    }

    /// Receive every future event; a slow subscriber gets `Lagged`
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Outward notification stream of a call engine
#[derive(Debug, Clone)]
pub struct EventBus {
    pub local_stream: Topic<LocalStream>,
    pub remote_stream: Topic<RemoteStreamEvent>,
    pub connection_state: Topic<ConnectionStateEvent>,
    pub peer_joined: Topic<PeerJoinedEvent>,
    pub peer_left: Topic<PeerLeftEvent>,
    pub error: Topic<CallErrorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        EventBus {
            local_stream: Topic::new(capacity),
            remote_stream: Topic::new(capacity),
            connection_state: Topic::new(capacity),
            peer_joined: Topic::new(capacity),
            peer_left: Topic::new(capacity),
            error: Topic::new(capacity),
        }
    }

    pub fn publish_error(&self, error: &CallError) {
        self.error.publish(CallErrorEvent::from_error(error));
    }

    pub fn publish_link_error(&self, peer: &UserId, error: &CallError) {
        self.error.publish(CallErrorEvent::for_link(peer, error));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
