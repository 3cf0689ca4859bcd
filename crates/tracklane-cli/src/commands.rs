//! CLI command implementations

use crate::output::{self, DemoReport, LayoutRow};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracklane_core::sim::{demo_renderers, EngineProbe, ScriptedBuilder, SimulatedEngine};
use tracklane_core::{
    detect_content_type, CaptionListener, ContentType, Cue, EngineEvent, EventRecorder, Format, InfoListener,
    InternalErrorListener, Metadata, MetadataListener, PlaybackSession, PlaybackState, SessionConfig,
    SessionListener, Surface, TrackSelection, TrackType, Trigger, VideoSize,
};
use url::Url;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

fn resolve(uri: &str, hint: Option<&str>) -> anyhow::Result<(Url, ContentType)> {
    let url = Url::parse(uri).with_context(|| format!("invalid content URI: {}", uri))?;
    let content_type = detect_content_type(&url, hint)?;
    Ok((url, content_type))
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<SessionConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(SessionConfig::from_json(&raw)?)
        }
        None => Ok(SessionConfig::default()),
    }
}

async fn settle(session: &mut PlaybackSession, state: PlaybackState) -> anyhow::Result<()> {
    tokio::time::timeout(SETTLE_TIMEOUT, async {
        while session.playback_state() != state {
            session.next_command().await;
        }
    })
    .await
    .with_context(|| format!("session did not reach {}", state))?;
    session.dispatch_pending();
    Ok(())
}

/// Events a real pipeline would raise once media flows
fn simulate_media(probe: &EngineProbe, session: &PlaybackSession) {
    let format = Format::video("v0", "video/avc", 1280, 720, 2_400_000);
    probe.emit(EngineEvent::DownstreamFormatChanged {
        track: TrackType::Video,
        format,
        trigger: Trigger::Initial,
        media_time_ms: 0,
    });
    probe.emit(EngineEvent::VideoSizeChanged(VideoSize {
        width: 1280,
        height: 720,
        pixel_aspect_ratio: 1.0,
    }));
    probe.emit(EngineEvent::BandwidthSample {
        elapsed_ms: 420,
        bytes: 262_144,
        bitrate_estimate: 4_993_219,
    });
    probe.emit(EngineEvent::DroppedFrames { count: 3, elapsed_ms: 5000 });
    if session.track_count(TrackType::Metadata) > 0 {
        let mut metadata = Metadata::new();
        metadata.insert("TIT2".into(), serde_json::json!("Demo"));
        probe.emit(EngineEvent::Metadata(metadata));
    }
}

/// Run a scripted session against the simulated engine
pub async fn demo(
    uri: &str,
    hint: Option<&str>,
    config_path: Option<PathBuf>,
    build_delay_ms: u64,
    format: &str,
) -> anyhow::Result<()> {
    let (url, content_type) = resolve(uri, hint)?;
    let config = load_config(config_path)?;
    info!(%url, %content_type, "Starting demo session");

    let engine = SimulatedEngine::auto_advancing(&config);
    let probe = engine.probe();
    probe.set_duration(Some(600_000));
    let builder = ScriptedBuilder::for_content(content_type).with_delay(Duration::from_millis(build_delay_ms));
    let analytics = config.analytics_enabled;
    let mut session = PlaybackSession::new(config, Box::new(engine), Box::new(builder))?;

    let (recorder, mut records) = EventRecorder::channel(session.id());
    if analytics {
        session.add_listener(recorder.clone() as Arc<dyn SessionListener>);
        session.set_internal_error_listener(Some(recorder.clone() as Arc<dyn InternalErrorListener>));
        session.set_info_listener(Some(recorder.clone() as Arc<dyn InfoListener>));
        session.set_caption_listener(Some(recorder.clone() as Arc<dyn CaptionListener>));
        session.set_metadata_listener(Some(recorder as Arc<dyn MetadataListener>));
    }

    session.set_surface(Some(Surface::new("demo")));
    session.set_play_when_ready(true);
    session.prepare()?;
    settle(&mut session, PlaybackState::Ready).await?;

    simulate_media(&probe, &session);
    session.dispatch_pending();

    let video_tracks = session.track_count(TrackType::Video);
    if video_tracks > 1 {
        debug!(video_tracks, "Switching to the last video track");
        session.select_track(TrackType::Video, TrackSelection::Track(video_tracks - 1));
    }

    if session.track_count(TrackType::Text) > 0 {
        session.select_track(TrackType::Text, TrackSelection::PRIMARY);
        probe.emit(EngineEvent::Cues(vec![Cue::new("Hello from the demo")]));
        session.dispatch_pending();
        session.select_track(TrackType::Text, TrackSelection::Disabled);
    }

    session.set_backgrounded(true)?;
    session.set_backgrounded(false)?;
    session.seek_to(30_000);

    // Rebuffer after the seek
    probe.set_state(PlaybackState::Buffering);
    probe.set_state(PlaybackState::Ready);
    session.dispatch_pending();

    let snapshot = session.debug_snapshot();
    session.release();

    let mut events = Vec::new();
    while let Ok(record) = records.try_recv() {
        events.push(record);
    }

    let report = DemoReport {
        uri: url.to_string(),
        content_type,
        snapshot,
        events,
    };
    println!("{}", output::render_demo(&report, format));
    Ok(())
}

/// Show the default track layout for the content
pub fn inspect(uri: &str, hint: Option<&str>, format: &str) -> anyhow::Result<()> {
    let (url, content_type) = resolve(uri, hint)?;
    let build = demo_renderers(content_type).normalize();

    let rows: Vec<LayoutRow> = TrackType::ALL
        .into_iter()
        .map(|track| {
            let names = &build.tables.track_names[track];
            LayoutRow {
                track: track.to_string(),
                renderer: build.renderers[track]
                    .renderer()
                    .map_or_else(|| "-".to_string(), |r| r.name().to_string()),
                switchable: build.tables.sources[track].is_some(),
                tracks: if build.renderers[track].is_absent() { 0 } else { names.len() },
                names: names
                    .iter()
                    .map(|n| n.as_deref().unwrap_or("?"))
                    .collect::<Vec<_>>()
                    .join(", "),
            }
        })
        .collect();

    println!("{}", output::render_layout(url.as_str(), content_type, &rows, format));
    Ok(())
}
