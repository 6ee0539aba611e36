//! NATS implementation of the signaling relay client
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
use bytes::Bytes;
use meshcall_types::{RelayCommand, RelayEvent, UserId};
use serde::{Deserialize, Serialize};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, error, info};

use crate::error::{RelayError, Result};
use crate::traits::{RelayEventStream, SignalingRelay};

/// Room command forwarded to the external room service.
///
/// Core NATS does not stamp a sender, so the relay adds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRequest {
    #[serde(rename = "senderId")]
    pub sender_id: UserId,
    #[serde(flatten)]
    pub command: RelayCommand,
}

/// Signaling relay over core NATS subjects.
///
/// Every user listens on `{prefix}.user.{user_id}`. Signals are published
/// straight into the target's inbox; room commands go to `{prefix}.rooms`
/// where the room service answers with rosters and join/leave notices.
pub struct NatsRelay {
    client: async_nats::Client,
    user_id: UserId,
    subject_prefix: String,
}

impl NatsRelay {
    /// Connect to the NATS server as `user_id`
    pub async fn connect(url: &str, user_id: UserId, subject_prefix: impl Into<String>) -> Result<Self> {
        info!(url = url, user = %user_id, "Connecting to NATS signaling relay");

        let client = async_nats::connect(url)
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        let relay = Self {
            client,
            user_id,
            subject_prefix: subject_prefix.into(),
        };

        info!(inbox = relay.inbox_subject(&relay.user_id), "NATS signaling relay initialized");
        Ok(relay)
    }

    /// Inbox subject of a user
    pub fn inbox_subject(&self, user_id: &UserId) -> String {
        format!("{}.user.{}", self.subject_prefix, user_id)
    }

    /// Subject the room service listens on
    pub fn rooms_subject(&self) -> String {
        format!("{}.rooms", self.subject_prefix)
    }

    async fn publish(&self, subject: String, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(subject, Bytes::from(payload))
            .await
            .map_err(|e| RelayError::Send(e.to_string()))
    }
}

#[async_trait]
impl SignalingRelay for NatsRelay {
    async fn send(&self, command: &RelayCommand) -> Result<()> {
        match command {
            RelayCommand::Signal { target_user_id, signal } => {
                let event = RelayEvent::Signal {
                    sender_id: self.user_id.clone(),
                    signal: signal.clone(),
                };
                let subject = self.inbox_subject(target_user_id);
                self.publish(subject.clone(), event.to_json()?).await?;

                debug!(
                    target = %target_user_id,
                    kind = %signal.kind(),
                    subject = subject,
                    "Signal published"
                );
            }
            room_command => {
                let request = RoomRequest {
                    sender_id: self.user_id.clone(),
                    command: room_command.clone(),
                };
                let payload = serde_json::to_vec(&request)?;
                self.publish(self.rooms_subject(), payload).await?;

                info!(event = room_command.event_name(), "Room command published");
            }
        }

        Ok(())
    }

    async fn subscribe(&self) -> Result<RelayEventStream> {
        let subject = self.inbox_subject(&self.user_id);
        info!(subject = subject, "Subscribing to relay inbox");

        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| RelayError::Subscribe(e.to_string()))?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<RelayEvent>>(100);

        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                match RelayEvent::from_json(&message.payload) {
                    Ok(event) => {
                        if tx.send(Ok(event)).await.is_err() {
                            debug!(subject = subject, "Receiver dropped, stopping subscription");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, subject = subject, "Failed to decode relay event");
                        if tx.send(Err(RelayError::Types(e))).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn local_user(&self) -> &UserId {
        &self.user_id
    }

    async fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }

    fn client_type(&self) -> &str {
        "nats"
    }
}
