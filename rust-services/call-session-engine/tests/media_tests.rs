//! Local media changes during a call

mod common;

use call_session_engine::{CallError, CallErrorKind, MediaKind, TrackSource, TrackStatus};
use common::{drain, user, Harness};
use meshcall_types::SignalKind;

async fn connected(video: bool) -> Harness {
    let mut h = Harness::new();
    h.add("alice").await;
    h.add("bob").await;
    h.engine("alice").start_call(&user("bob"), video).await.unwrap();
    h.pump().await;
    h
}

async fn offers_from_alice(h: &Harness) -> usize {
    h.hub
        .signals_between(&user("alice"), &user("bob"), SignalKind::Offer)
        .await
}

fn sent_track(h: &Harness, kind: MediaKind) -> Option<Option<uuid::Uuid>> {
    h.peer("alice")
        .engine
        .registry()
        .get(&user("bob"))
        .and_then(|link| link.senders().into_iter().find(|s| s.kind == kind))
        .map(|sender| sender.track.map(|t| t.id()))
}

#[tokio::test]
async fn test_video_toggle_renegotiates_twice() {
    let mut h = connected(false).await;
    assert_eq!(offers_from_alice(&h).await, 1);

    h.engine("alice").set_video_enabled(true).await.unwrap();
    h.pump().await;
    h.engine("alice").set_video_enabled(false).await.unwrap();
    h.pump().await;
    h.engine("alice").set_video_enabled(true).await.unwrap();
    h.pump().await;

    assert_eq!(offers_from_alice(&h).await, 3);

    let live_video: Vec<_> = h
        .peer("alice")
        .devices
        .live_tracks()
        .into_iter()
        .filter(|t| t.kind() == MediaKind::Video)
        .collect();
    assert_eq!(live_video.len(), 1);

    let local_video = h.peer("alice").engine.local_stream().video().cloned().unwrap();
    assert_eq!(local_video, live_video[0]);
    assert_eq!(sent_track(&h, MediaKind::Video), Some(Some(local_video.id())));

    let bob = h.peer("bob").engine.snapshot();
    assert_eq!(bob.link(&user("alice")).unwrap().remote_tracks, 2);
}

#[tokio::test]
async fn test_camera_off_removes_sender_without_offer() {
    let mut h = connected(true).await;
    let camera = h.peer("alice").engine.local_stream().video().cloned().unwrap();

    h.engine("alice").set_video_enabled(false).await.unwrap();
    h.pump().await;

    assert_eq!(camera.status(), TrackStatus::Stopped);
    assert!(h.peer("alice").engine.local_stream().video().is_none());
    assert_eq!(sent_track(&h, MediaKind::Video), None);
    assert_eq!(offers_from_alice(&h).await, 1);
}

#[tokio::test]
async fn test_unmute_replaces_audio_in_place() {
    let mut h = connected(false).await;
    let mut local = h.peer("alice").engine.events().local_stream.subscribe();
    let first_mic = h.peer("alice").engine.local_stream().audio().cloned().unwrap();

    h.engine("alice").set_audio_enabled(false).await.unwrap();
    assert_eq!(first_mic.status(), TrackStatus::Stopped);
    assert_eq!(sent_track(&h, MediaKind::Audio), Some(None));

    h.engine("alice").set_audio_enabled(true).await.unwrap();
    h.pump().await;

    let second_mic = h.peer("alice").engine.local_stream().audio().cloned().unwrap();
    assert_ne!(first_mic, second_mic);
    assert!(second_mic.is_live());
    assert_eq!(sent_track(&h, MediaKind::Audio), Some(Some(second_mic.id())));
    assert_eq!(offers_from_alice(&h).await, 1);
    assert_eq!(drain(&mut local).len(), 2);
}

#[tokio::test]
async fn test_callee_microphone_added_by_renegotiation() {
    let mut h = connected(false).await;
    let mut alice_streams = h.peer("alice").engine.events().remote_stream.subscribe();

    h.engine("bob").set_audio_enabled(true).await.unwrap();
    h.pump().await;

    assert_eq!(
        h.hub
            .signals_between(&user("bob"), &user("alice"), SignalKind::Offer)
            .await,
        1
    );
    let streams = drain(&mut alice_streams);
    assert_eq!(streams.len(), 1);
    assert!(streams[0].stream.has(MediaKind::Audio));
}

#[tokio::test]
async fn test_screen_share_substitutes_without_renegotiation() {
    let mut h = connected(true).await;

    h.engine("alice").start_screen_share().await.unwrap();
    h.pump().await;

    let shared = h.peer("alice").engine.local_stream().video().cloned().unwrap();
    assert_eq!(shared.source(), TrackSource::Screen);
    assert_eq!(sent_track(&h, MediaKind::Video), Some(Some(shared.id())));
    assert_eq!(offers_from_alice(&h).await, 1);

    h.engine("alice").stop_screen_share().await.unwrap();
    h.pump().await;

    let camera = h.peer("alice").engine.local_stream().video().cloned().unwrap();
    assert_eq!(camera.source(), TrackSource::Camera);
    assert!(camera.is_live());
    assert_eq!(sent_track(&h, MediaKind::Video), Some(Some(camera.id())));
    assert_eq!(shared.status(), TrackStatus::Stopped);
    assert_eq!(offers_from_alice(&h).await, 1);
}

#[tokio::test]
async fn test_revoked_screen_share_restores_camera() {
    let mut h = connected(true).await;
    h.engine("alice").start_screen_share().await.unwrap();
    h.pump().await;
    let shared = h.peer("alice").engine.local_stream().video().cloned().unwrap();

    shared.end();
    h.pump().await;

    assert!(!h.peer("alice").engine.is_screen_sharing());
    let camera = h.peer("alice").engine.local_stream().video().cloned().unwrap();
    assert_eq!(camera.source(), TrackSource::Camera);
    assert_eq!(sent_track(&h, MediaKind::Video), Some(Some(camera.id())));
}

#[tokio::test]
async fn test_screen_share_in_audio_only_call_adds_video() {
    let mut h = connected(false).await;
    h.engine("alice").start_screen_share().await.unwrap();
    h.pump().await;

    assert_eq!(offers_from_alice(&h).await, 2);
    let bob = h.peer("bob").engine.snapshot();
    assert_eq!(bob.link(&user("alice")).unwrap().remote_tracks, 2);

    h.engine("alice").stop_screen_share().await.unwrap();
    assert!(h.peer("alice").engine.local_stream().video().is_none());
    assert_eq!(sent_track(&h, MediaKind::Video), None);
}

#[tokio::test]
async fn test_camera_toggle_during_share_keeps_screen() {
    let mut h = connected(true).await;
    h.engine("alice").start_screen_share().await.unwrap();
    let shared = h.peer("alice").engine.local_stream().video().cloned().unwrap();

    h.engine("alice").set_video_enabled(false).await.unwrap();
    assert_eq!(h.peer("alice").engine.local_stream().video(), Some(&shared));
    assert_eq!(sent_track(&h, MediaKind::Video), Some(Some(shared.id())));

    h.engine("alice").stop_screen_share().await.unwrap();
    assert!(h.peer("alice").engine.local_stream().video().is_none());
    assert_eq!(sent_track(&h, MediaKind::Video), None);
}

#[tokio::test]
async fn test_display_capture_denied() {
    let mut h = connected(true).await;
    h.peer("alice").devices.deny_display(true);
    let mut errors = h.peer("alice").engine.events().error.subscribe();

    let err = h.engine("alice").start_screen_share().await.unwrap_err();
    assert!(matches!(err, CallError::DisplayCaptureDenied(_)));

    let errors = drain(&mut errors);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, CallErrorKind::DisplayCaptureDenied);
    let video = h.peer("alice").engine.local_stream().video().cloned().unwrap();
    assert_eq!(video.source(), TrackSource::Camera);
}

#[tokio::test]
async fn test_denied_camera_call_proceeds_with_audio() {
    let mut h = Harness::new();
    h.add("alice").await;
    h.add("bob").await;
    h.peer("alice").devices.deny(MediaKind::Video, true);
    let mut errors = h.peer("alice").engine.events().error.subscribe();

    let stream = h.engine("alice").start_call(&user("bob"), true).await.unwrap();
    assert!(stream.audio().is_some());
    assert!(stream.video().is_none());

    let errors = drain(&mut errors);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, CallErrorKind::MediaAccessDenied);
    assert!(errors[0].is_session_scoped());

    h.pump().await;
    let alice = h.peer("alice").engine.snapshot();
    assert_eq!(
        alice.link(&user("bob")).unwrap().state,
        call_session_engine::LinkState::Connected
    );
}

#[tokio::test]
async fn test_denied_camera_toggle_reports_error() {
    let mut h = connected(false).await;
    h.peer("alice").devices.deny(MediaKind::Video, true);

    let err = h.engine("alice").set_video_enabled(true).await.unwrap_err();
    assert!(matches!(
        err,
        CallError::MediaAccessDenied {
            kind: MediaKind::Video,
            ..
        }
    ));
    assert_eq!(offers_from_alice(&h).await, 1);
}
