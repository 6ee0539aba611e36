//! Media tracks, local/remote streams and the capture device seam
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
use meshcall_types::UserId;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::CallResult;

/// Media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Where a track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
    /// Received from a peer
    Remote,
}

/// Track lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Live,
    /// Stopped locally; no ended notification is raised
    Stopped,
    /// The source went away (device unplugged, screen share revoked)
    Ended,
}

struct TrackInner {
    id: Uuid,
    kind: MediaKind,
    source: TrackSource,
    label: String,
    status: watch::Sender<TrackStatus>,
}

/// Shared handle to one media track.
///
/// Clones refer to the same track; equality is track identity.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: MediaKind, source: TrackSource, label: impl Into<String>) -> Self {
        let (status, _) = watch::channel(TrackStatus::Live);
        MediaTrack {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4(),
                kind,
                source,
                label: label.into(),
                status,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn status(&self) -> TrackStatus {
        *self.inner.status.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.status() == TrackStatus::Live
    }

    /// Release the underlying device
    pub fn stop(&self) {
        self.finish(TrackStatus::Stopped);
    }

    /// Mark the source as gone
    pub fn end(&self) {
        self.finish(TrackStatus::Ended);
    }

    fn finish(&self, status: TrackStatus) {
        self.inner.status.send_if_modified(|current| {
            if *current == TrackStatus::Live {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    /// Resolve once the track is no longer live, with its final status
    pub async fn finished(&self) -> TrackStatus {
        let mut rx = self.inner.status.subscribe();
        let status = match rx.wait_for(|status| *status != TrackStatus::Live).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaTrack {}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("label", &self.inner.label)
            .field("status", &self.status())
            .finish()
    }
}

/// Local capture: zero-or-one audio track and zero-or-one video track
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: Uuid,
    audio: Option<MediaTrack>,
    video: Option<MediaTrack>,
}

impl LocalStream {
    pub fn new() -> Self {
        LocalStream {
            id: Uuid::new_v4(),
            audio: None,
            video: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn audio(&self) -> Option<&MediaTrack> {
        self.audio.as_ref()
    }

    pub fn video(&self) -> Option<&MediaTrack> {
        self.video.as_ref()
    }

    pub fn track(&self, kind: MediaKind) -> Option<&MediaTrack> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    /// Put a track in its slot, returning the previous occupant
    pub(crate) fn set_track(&mut self, kind: MediaKind, track: Option<MediaTrack>) -> Option<MediaTrack> {
        match kind {
            MediaKind::Audio => std::mem::replace(&mut self.audio, track),
            MediaKind::Video => std::mem::replace(&mut self.video, track),
        }
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.audio.iter().chain(self.video.iter()).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    /// Stop and drop every track
    pub(crate) fn stop_all(&mut self) {
        for track in [self.audio.take(), self.video.take()].into_iter().flatten() {
            track.stop();
        }
    }
}

impl Default for LocalStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks received from one peer
#[derive(Debug, Clone)]
pub struct RemoteStream {
    user_id: UserId,
    tracks: Vec<MediaTrack>,
}

impl RemoteStream {
    pub fn new(user_id: UserId) -> Self {
        RemoteStream {
            user_id,
            tracks: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: MediaKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn has(&self, kind: MediaKind) -> bool {
        self.track(kind).is_some()
    }

    /// A newly negotiated track replaces the previous one of its kind
    pub(crate) fn add_track(&mut self, track: MediaTrack) {
        self.tracks.retain(|t| t.kind() != track.kind());
        self.tracks.push(track);
    }
}

/// What to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        MediaConstraints {
            audio: true,
            video: false,
        }
    }

    pub fn video_only() -> Self {
        MediaConstraints {
            audio: false,
            video: true,
        }
    }
}

/// Capture device access.
///
/// Permission prompts live behind this trait and resolve to tracks or to
/// `MediaAccessDenied` / `DisplayCaptureDenied`.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Capture microphone and/or camera
    async fn user_media(&self, constraints: MediaConstraints) -> CallResult<Vec<MediaTrack>>;

    /// Capture a screen or window as a video track
    async fn display_media(&self) -> CallResult<MediaTrack>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_not_an_end() {
        let track = MediaTrack::new(MediaKind::Audio, TrackSource::Microphone, "mic");
        assert!(track.is_live());
        track.stop();
        assert_eq!(track.status(), TrackStatus::Stopped);
        track.end();
        assert_eq!(track.status(), TrackStatus::Stopped);
    }

    #[test]
    fn test_finished_waits_for_end() {
        let track = MediaTrack::new(MediaKind::Video, TrackSource::Screen, "screen");
        let mut finished = tokio_test::task::spawn(track.finished());
        tokio_test::assert_pending!(finished.poll());

        track.end();
        tokio_test::assert_ready_eq!(finished.poll(), TrackStatus::Ended);
    }

    #[test]
    fn test_local_stream_slots() {
        let mut stream = LocalStream::new();
        assert!(stream.is_empty());

        let mic = MediaTrack::new(MediaKind::Audio, TrackSource::Microphone, "mic");
        assert!(stream.set_track(MediaKind::Audio, Some(mic.clone())).is_none());
        assert_eq!(stream.audio(), Some(&mic));
        assert_eq!(stream.tracks().len(), 1);

        stream.stop_all();
        assert!(stream.is_empty());
        assert_eq!(mic.status(), TrackStatus::Stopped);
    }

    #[test]
    fn test_remote_stream_replaces_same_kind() {
        let mut stream = RemoteStream::new(UserId::new("bob"));
        let first = MediaTrack::new(MediaKind::Video, TrackSource::Remote, "cam-1");
        let second = MediaTrack::new(MediaKind::Video, TrackSource::Remote, "cam-2");
        stream.add_track(first);
        stream.add_track(second.clone());
        assert_eq!(stream.tracks().len(), 1);
        assert_eq!(stream.track(MediaKind::Video), Some(&second));
    }
}
