//! Integration tests for Tracklane Core

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracklane_core::sim::{EngineCall, ScriptedBuilder, SimulatedEngine};
use tracklane_core::{
    detect_content_type, BuildState, ContentType, Error, EventRecorder, InfoListener, PlaybackSession,
    PlaybackState, SessionConfig, SessionEvent, SessionListener, TrackSelection, TrackType,
};
use url::Url;

async fn drive_until(session: &mut PlaybackSession, done: impl Fn(&PlaybackSession) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(session) {
            session.next_command().await;
        }
    })
    .await
    .expect("session did not settle in time");
}

fn auto_session(builder: ScriptedBuilder) -> (PlaybackSession, tracklane_core::sim::EngineProbe) {
    let config = SessionConfig::default();
    let engine = SimulatedEngine::auto_advancing(&config);
    let probe = engine.probe();
    let session = PlaybackSession::new(config, Box::new(engine), Box::new(builder)).unwrap();
    (session, probe)
}

// =============================================================================
// Session Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_async_build_reaches_ready() {
    let builder = ScriptedBuilder::for_content(ContentType::Dash).with_delay(Duration::from_millis(10));
    let (mut session, _probe) = auto_session(builder);

    session.prepare().unwrap();
    assert_eq!(session.playback_state(), PlaybackState::Preparing);

    drive_until(&mut session, |s| s.playback_state() == PlaybackState::Ready).await;
    assert_eq!(session.build_state(), BuildState::Built);
    assert_eq!(session.track_count(TrackType::Video), 3);
    assert_eq!(session.track_count(TrackType::Audio), 2);
    assert_eq!(session.buffered_percentage(), 100);
}

#[tokio::test]
async fn test_superseded_build_never_delivers() {
    let builder = ScriptedBuilder::for_content(ContentType::Hls).with_delay(Duration::from_millis(30));
    let stats = builder.stats();
    let (mut session, probe) = auto_session(builder);

    session.prepare().unwrap();
    session.prepare().unwrap();
    drive_until(&mut session, |s| s.build_state() == BuildState::Built).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.dispatch_pending();

    assert_eq!(stats.builds_started.load(Ordering::SeqCst), 2);
    assert_eq!(stats.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(stats.delivered.load(Ordering::SeqCst), 1);
    let prepares = probe
        .calls()
        .iter()
        .filter(|call| matches!(call, EngineCall::Prepare { .. }))
        .count();
    assert_eq!(prepares, 1);
}

#[tokio::test]
async fn test_recorder_streams_state_changes() {
    let builder = ScriptedBuilder::for_content(ContentType::SmoothStreaming);
    let (mut session, _probe) = auto_session(builder);
    let (recorder, mut rx) = EventRecorder::channel(session.id());
    session.add_listener(recorder.clone() as Arc<dyn SessionListener>);
    session.set_info_listener(Some(recorder as Arc<dyn InfoListener>));

    session.set_play_when_ready(true);
    session.prepare().unwrap();
    drive_until(&mut session, |s| s.playback_state() == PlaybackState::Ready).await;
    // The engine queues its state events before the state becomes visible
    session.dispatch_pending();

    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    assert!(!records.is_empty());
    assert!(records.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(records.iter().all(|r| r.session_id == session.id()));
    assert_eq!(
        records.last().map(|r| r.event.clone()),
        Some(SessionEvent::StateChanged {
            play_when_ready: true,
            state: PlaybackState::Ready
        })
    );
}

#[tokio::test]
async fn test_build_failure_then_recovery() {
    let (mut session, _probe) = auto_session(ScriptedBuilder::failing("manifest unreachable"));
    session.prepare().unwrap();
    drive_until(&mut session, |s| s.build_state() == BuildState::Idle).await;
    assert_eq!(session.playback_state(), PlaybackState::Idle);

    session.prepare().unwrap();
    assert_eq!(session.build_state(), BuildState::Building);
}

#[tokio::test]
async fn test_background_during_playback() {
    let builder = ScriptedBuilder::for_content(ContentType::Dash);
    let (mut session, probe) = auto_session(builder);
    session.set_surface(Some(tracklane_core::Surface::new("main")));
    session.prepare().unwrap();
    drive_until(&mut session, |s| s.playback_state() == PlaybackState::Ready).await;

    session.select_track(TrackType::Video, TrackSelection::Track(2));
    session.set_backgrounded(true).unwrap();
    assert!(!probe.renderer_enabled(TrackType::Video));

    session.set_backgrounded(false).unwrap();
    assert_eq!(session.selected_track(TrackType::Video), TrackSelection::Track(2));
    assert!(probe.renderer_enabled(TrackType::Video));
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_config_from_json_partial() {
    let config = SessionConfig::from_json(r#"{"min_buffer_ms": 2500, "initial_text_selection": {"track": 0}}"#)
        .unwrap();
    assert_eq!(config.min_buffer_ms, 2500);
    assert_eq!(config.min_rebuffer_ms, 5000);
    assert_eq!(config.initial_text_selection, TrackSelection::PRIMARY);
}

#[test]
fn test_invalid_config_rejects_session() {
    let config = SessionConfig {
        min_buffer_ms: 0,
        ..SessionConfig::default()
    };
    let engine = SimulatedEngine::new(&SessionConfig::default());
    let result = PlaybackSession::new(config, Box::new(engine), Box::new(ScriptedBuilder::failing("unused")));
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_initial_text_selection_applies() {
    let config = SessionConfig {
        initial_text_selection: TrackSelection::PRIMARY,
        ..SessionConfig::default()
    };
    let engine = SimulatedEngine::new(&config);
    let session = PlaybackSession::new(config, Box::new(engine), Box::new(ScriptedBuilder::failing("unused"))).unwrap();
    assert_eq!(session.selected_track(TrackType::Text), TrackSelection::PRIMARY);
    assert_eq!(session.selected_track(TrackType::Video), TrackSelection::PRIMARY);
}

// =============================================================================
// Content Detection Tests
// =============================================================================

#[test]
fn test_detected_content_builds_matching_layout() {
    let url = Url::parse("https://cdn.example.com/live/master.m3u8").unwrap();
    let content_type = detect_content_type(&url, None).unwrap();
    assert_eq!(content_type, ContentType::Hls);

    let config = SessionConfig::default();
    let engine = SimulatedEngine::new(&config);
    let mut session =
        PlaybackSession::new(config, Box::new(engine), Box::new(ScriptedBuilder::for_content(content_type))).unwrap();
    session.prepare().unwrap();
    session.dispatch_pending();

    assert_eq!(session.track_count(TrackType::Video), 4);
    assert_eq!(session.track_name(TrackType::Video, 3), Some("1080p"));
    assert_eq!(session.track_count(TrackType::Audio), 1);
    assert_eq!(session.track_name(TrackType::Audio, 0), None);
}
