//! Actor driver for [`CallEngine`]
//!
//! [`CallClient`] is a cloneable handle. One task owns the engine and feeds
//! it facade commands, relay events and backend callbacks one at a time.
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


use futures::StreamExt;
use meshcall_config::CallConfig;
use meshcall_types::{RoomId, UserId};
use signaling_relay_client::{RelayEventStream, SignalingRelay};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::{EngineEventReceiver, PeerConnectionFactory};
use crate::connection_health::{CallQuality, QualitySample};
use crate::error::{CallError, CallResult};
use crate::events::EventBus;
use crate::media::{LocalStream, MediaDevices};
use crate::session::{CallEngine, SessionSnapshot};

type Reply<T> = oneshot::Sender<CallResult<T>>;

enum Command {
    StartCall { target: UserId, video: bool, reply: Reply<LocalStream> },
    JoinGroup { room_id: RoomId, video: bool, reply: Reply<LocalStream> },
    Invite { user_id: UserId, reply: Reply<()> },
    EndCall { reply: Reply<()> },
    SetAudio { enabled: bool, reply: Reply<()> },
    SetVideo { enabled: bool, reply: Reply<()> },
    StartScreenShare { reply: Reply<()> },
    StopScreenShare { reply: Reply<()> },
    SampleQuality { reply: Reply<CallQuality> },
    SampleLinkQuality { peer: UserId, reply: Reply<QualitySample> },
    Snapshot { reply: Reply<SessionSnapshot> },
    Shutdown { reply: Reply<()> },
}

/// Handle to a running call engine
#[derive(Clone)]
pub struct CallClient {
    local_id: UserId,
    commands: mpsc::Sender<Command>,
    events: EventBus,
}

impl CallClient {
    /// Build the engine, subscribe to the relay and start the driver task
    pub async fn spawn(
        config: &CallConfig,
        relay: Arc<dyn SignalingRelay>,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> CallResult<Self> {
        let (engine, engine_events) = CallEngine::new(config, relay, devices, factory)?;
        let relay_events = engine.relay_events().await?;
        let (commands, command_rx) = mpsc::channel(config.command_channel_capacity);

        let client = CallClient {
            local_id: engine.local_id().clone(),
            commands,
            events: engine.events().clone(),
        };
        tokio::spawn(run(engine, command_rx, relay_events, engine_events));
        Ok(client)
    }

    pub fn local_id(&self) -> &UserId {
        &self.local_id
    }

    /// Subscribe to outbound notifications
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> CallResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CallError::ClientStopped)?;
        response.await.map_err(|_| CallError::ClientStopped)?
    }

    pub async fn start_call(&self, target: &UserId, video: bool) -> CallResult<LocalStream> {
        let target = target.clone();
        self.request(|reply| Command::StartCall { target, video, reply }).await
    }

    pub async fn join_group_call(&self, room_id: &RoomId, video: bool) -> CallResult<LocalStream> {
        let room_id = room_id.clone();
        self.request(|reply| Command::JoinGroup { room_id, video, reply }).await
    }

    pub async fn invite(&self, user_id: &UserId) -> CallResult<()> {
        let user_id = user_id.clone();
        self.request(|reply| Command::Invite { user_id, reply }).await
    }

    pub async fn end_call(&self) -> CallResult<()> {
        self.request(|reply| Command::EndCall { reply }).await
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> CallResult<()> {
        self.request(|reply| Command::SetAudio { enabled, reply }).await
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> CallResult<()> {
        self.request(|reply| Command::SetVideo { enabled, reply }).await
    }

    pub async fn start_screen_share(&self) -> CallResult<()> {
        self.request(|reply| Command::StartScreenShare { reply }).await
    }

    pub async fn stop_screen_share(&self) -> CallResult<()> {
        self.request(|reply| Command::StopScreenShare { reply }).await
    }

    pub async fn sample_quality(&self) -> CallResult<CallQuality> {
        self.request(|reply| Command::SampleQuality { reply }).await
    }

    pub async fn sample_link_quality(&self, peer: &UserId) -> CallResult<QualitySample> {
        let peer = peer.clone();
        self.request(|reply| Command::SampleLinkQuality { peer, reply }).await
    }

    pub async fn snapshot(&self) -> CallResult<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// End any call and stop the driver task
    pub async fn shutdown(&self) -> CallResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

async fn run(
    mut engine: CallEngine,
    mut commands: mpsc::Receiver<Command>,
    mut relay_events: RelayEventStream,
    mut engine_events: EngineEventReceiver,
) {
    info!(user = %engine.local_id(), "Call client started");
    let mut relay_open = true;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown { reply }) => {
                    let _ = reply.send(engine.end_call().await);
                    break;
                }
                Some(command) => dispatch(&mut engine, command).await,
                None => {
                    debug!(user = %engine.local_id(), "Every handle dropped");
                    let _ = engine.end_call().await;
                    break;
                }
            },
            event = relay_events.next(), if relay_open => match event {
                Some(Ok(event)) => engine.handle_relay_event(event).await,
                Some(Err(e)) => warn!(user = %engine.local_id(), error = %e, "Relay delivered an unreadable event"),
                None => {
                    warn!(user = %engine.local_id(), "Relay stream closed");
                    relay_open = false;
                }
            },
            Some(event) = engine_events.recv() => engine.handle_engine_event(event).await,
        }
    }

    info!(user = %engine.local_id(), "Call client stopped");
}

async fn dispatch(engine: &mut CallEngine, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting
    match command {
        Command::StartCall { target, video, reply } => {
            let _ = reply.send(engine.start_call(&target, video).await);
        }
        Command::JoinGroup { room_id, video, reply } => {
            let _ = reply.send(engine.join_group_call(&room_id, video).await);
        }
        Command::Invite { user_id, reply } => {
            let _ = reply.send(engine.invite(&user_id).await);
        }
        Command::EndCall { reply } => {
            let _ = reply.send(engine.end_call().await);
        }
        Command::SetAudio { enabled, reply } => {
            let _ = reply.send(engine.set_audio_enabled(enabled).await);
        }
        Command::SetVideo { enabled, reply } => {
            let _ = reply.send(engine.set_video_enabled(enabled).await);
        }
        Command::StartScreenShare { reply } => {
            let _ = reply.send(engine.start_screen_share().await);
        }
        Command::StopScreenShare { reply } => {
            let _ = reply.send(engine.stop_screen_share().await);
        }
        Command::SampleQuality { reply } => {
            let _ = reply.send(engine.sample_quality().await);
        }
        Command::SampleLinkQuality { peer, reply } => {
            let _ = reply.send(engine.sample_link_quality(&peer).await);
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(Ok(engine.snapshot()));
        }
        Command::Shutdown { reply } => {
            let _ = reply.send(engine.end_call().await);
        }
    }
}
