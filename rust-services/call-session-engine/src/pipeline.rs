//! Local media pipeline
//!
//! Sole writer of the local stream. Every change to what is sent is pushed
//! to all links: by track replace when the link already has a sender for
//! that kind, otherwise by adding a sender and renegotiating.
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
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CallError, CallResult};
use crate::media::{LocalStream, MediaConstraints, MediaDevices, MediaKind, MediaTrack, TrackStatus};
use crate::registry::{PeerRegistry, TrackPush};
use crate::relay_adapter::RelayAdapter;

/// Outcome of a pipeline mutation
#[derive(Debug, Default)]
pub struct MediaUpdate {
    /// The local stream changed and should be republished
    pub changed: bool,
    /// Errors, scoped to a link when `Some(peer)`
    pub failures: Vec<(Option<UserId>, CallError)>,
}

impl MediaUpdate {
    fn unchanged() -> Self {
        MediaUpdate::default()
    }

    fn session_failure(error: CallError) -> Self {
        MediaUpdate {
            changed: false,
            failures: vec![(None, error)],
        }
    }

    fn link_failures(&mut self, failures: Vec<(UserId, CallError)>) {
        self.failures
            .extend(failures.into_iter().map(|(peer, e)| (Some(peer), e)));
    }
}

pub struct LocalMediaPipeline {
    devices: Arc<dyn MediaDevices>,
    stream: LocalStream,
    screen: Option<MediaTrack>,
    /// Camera requested by the user; survives a screen share
    camera_on: bool,
}

impl LocalMediaPipeline {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        LocalMediaPipeline {
            devices,
            stream: LocalStream::new(),
            screen: None,
            camera_on: false,
        }
    }

    pub fn stream(&self) -> &LocalStream {
        &self.stream
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    pub fn is_camera_on(&self) -> bool {
        self.camera_on
    }

    async fn capture(&self, kind: MediaKind) -> CallResult<MediaTrack> {
        let constraints = match kind {
            MediaKind::Audio => MediaConstraints::audio_only(),
            MediaKind::Video => MediaConstraints::video_only(),
        };
        self.devices
            .user_media(constraints)
            .await?
            .into_iter()
            .find(|track| track.kind() == kind)
            .ok_or_else(|| CallError::MediaAccessDenied {
                kind,
                reason: "no track returned".to_string(),
            })
    }

    /// Capture microphone and optionally camera, each kind on its own.
    ///
    /// A denied kind is reported and the stream goes ahead without it.
    pub async fn acquire(&mut self, video: bool) -> (LocalStream, Vec<CallError>) {
        let mut denied = Vec::new();
        let mut kinds = vec![MediaKind::Audio];
        if video {
            kinds.push(MediaKind::Video);
        }

        for kind in kinds {
            match self.capture(kind).await {
                Ok(track) => {
                    debug!(kind = %kind, track = %track.id(), "Local track acquired");
                    if let Some(old) = self.stream.set_track(kind, Some(track)) {
                        old.stop();
                    }
                    if kind == MediaKind::Video {
                        self.camera_on = true;
                    }
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Capture denied");
                    denied.push(e);
                }
            }
        }

        (self.stream.clone(), denied)
    }

    /// Mute stops the microphone; unmute captures a fresh track and swaps it in
    pub async fn set_audio_enabled(
        &mut self,
        enabled: bool,
        registry: &mut PeerRegistry,
        relay: &RelayAdapter,
    ) -> MediaUpdate {
        if enabled == self.stream.audio().is_some() {
            return MediaUpdate::unchanged();
        }

        if !enabled {
            if let Some(track) = self.stream.set_track(MediaKind::Audio, None) {
                track.stop();
            }
            let push = registry.push_to_all(MediaKind::Audio, None).await;
            info!("Microphone disabled");
            return self.finish(push, registry, relay).await;
        }

        let track = match self.capture(MediaKind::Audio).await {
            Ok(track) => track,
            Err(e) => return MediaUpdate::session_failure(e),
        };
        self.stream.set_track(MediaKind::Audio, Some(track.clone()));
        let push = registry.push_to_all(MediaKind::Audio, Some(track)).await;
        info!("Microphone enabled");
        self.finish(push, registry, relay).await
    }

    /// Camera on captures and renegotiates; camera off stops and removes the
    /// sender. While sharing the screen only the preference is recorded.
    pub async fn set_video_enabled(
        &mut self,
        enabled: bool,
        registry: &mut PeerRegistry,
        relay: &RelayAdapter,
    ) -> MediaUpdate {
        if self.is_screen_sharing() {
            debug!(enabled, "Camera preference recorded during screen share");
            self.camera_on = enabled;
            return MediaUpdate::unchanged();
        }
        if enabled == self.stream.video().is_some() {
            return MediaUpdate::unchanged();
        }

        if !enabled {
            self.camera_on = false;
            if let Some(track) = self.stream.set_track(MediaKind::Video, None) {
                track.stop();
            }
            let mut update = MediaUpdate {
                changed: true,
                failures: Vec::new(),
            };
            update.link_failures(registry.remove_from_all(MediaKind::Video));
            info!("Camera disabled");
            return update;
        }

        let track = match self.capture(MediaKind::Video).await {
            Ok(track) => track,
            Err(e) => return MediaUpdate::session_failure(e),
        };
        self.camera_on = true;
        self.stream.set_track(MediaKind::Video, Some(track.clone()));
        let push = registry.push_to_all(MediaKind::Video, Some(track)).await;
        info!(renegotiate = push.renegotiate.len(), "Camera enabled");
        self.finish(push, registry, relay).await
    }

    /// Substitute a screen capture for the outgoing video.
    ///
    /// Returns the screen track so its end can be watched.
    pub async fn start_screen_share(
        &mut self,
        registry: &mut PeerRegistry,
        relay: &RelayAdapter,
    ) -> CallResult<(MediaTrack, MediaUpdate)> {
        if let Some(screen) = &self.screen {
            return Ok((screen.clone(), MediaUpdate::unchanged()));
        }

        let screen = self.devices.display_media().await?;
        if let Some(camera) = self.stream.set_track(MediaKind::Video, Some(screen.clone())) {
            camera.stop();
        }
        self.screen = Some(screen.clone());

        let push = registry.push_to_all(MediaKind::Video, Some(screen.clone())).await;
        info!(track = %screen.id(), "Screen share started");
        let update = self.finish(push, registry, relay).await;
        Ok((screen, update))
    }

    /// Return to the camera, or to no video if the camera is off
    pub async fn stop_screen_share(&mut self, registry: &mut PeerRegistry, relay: &RelayAdapter) -> MediaUpdate {
        let Some(screen) = self.screen.take() else {
            return MediaUpdate::unchanged();
        };
        screen.stop();
        self.stream.set_track(MediaKind::Video, None);

        let mut update = MediaUpdate {
            changed: true,
            failures: Vec::new(),
        };
        if self.camera_on {
            match self.capture(MediaKind::Video).await {
                Ok(camera) => {
                    self.stream.set_track(MediaKind::Video, Some(camera.clone()));
                    let push = registry.push_to_all(MediaKind::Video, Some(camera)).await;
                    info!("Screen share stopped, camera restored");
                    return self.finish(push, registry, relay).await;
                }
                Err(e) => {
                    self.camera_on = false;
                    update.failures.push((None, e));
                }
            }
        }

        update.link_failures(registry.remove_from_all(MediaKind::Video));
        info!("Screen share stopped, video off");
        update
    }

    /// React to a local track leaving the live state
    pub async fn on_track_finished(
        &mut self,
        track_id: Uuid,
        status: TrackStatus,
        registry: &mut PeerRegistry,
        relay: &RelayAdapter,
    ) -> Option<MediaUpdate> {
        let is_screen = self.screen.as_ref().map(|s| s.id()) == Some(track_id);
        if !is_screen || status != TrackStatus::Ended {
            return None;
        }
        info!(track = %track_id, "Shared screen ended by the source");
        Some(self.stop_screen_share(registry, relay).await)
    }

    /// Stop every local track
    pub fn release(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        self.stream.stop_all();
        self.camera_on = false;
    }

    async fn finish(&self, push: TrackPush, registry: &mut PeerRegistry, relay: &RelayAdapter) -> MediaUpdate {
        let mut update = MediaUpdate {
            changed: true,
            failures: Vec::new(),
        };
        update.link_failures(push.failed);
        if !push.renegotiate.is_empty() {
            update.link_failures(registry.renegotiate(&push.renegotiate, relay).await);
        }
        update
    }
}
