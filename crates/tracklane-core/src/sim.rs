//! Simulated engine and builders
//!
//! [`SimulatedEngine`] runs renderers on a real playback thread and records
//! every call the session makes, in order. [`ScriptedBuilder`] produces
//! renderers after an optional delay and honours cancellation. Together they
//! back the test suite and the CLI demo.

use crate::{
    builder::{BuiltRenderers, RendererBuilder},
    config::SessionConfig,
    content::ContentType,
    engine::{BandwidthMeter, EngineEvent, EngineMessage, MessageTarget, MultiTrackSource, PlaybackEngine, Renderer, RendererSlot},
    error::{Error, Result},
    queue::{BuildRequest, EventSink},
    types::*,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Target of a recorded message, with sources reduced to their identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedTarget {
    Renderer(TrackType),
    Source,
}

impl From<&MessageTarget> for RecordedTarget {
    fn from(target: &MessageTarget) -> Self {
        match target {
            MessageTarget::Renderer(track) => RecordedTarget::Renderer(*track),
            MessageTarget::Source(_) => RecordedTarget::Source,
        }
    }
}

/// A call made on the engine, recorded on the caller's side
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Prepare { absent: Vec<TrackType> },
    SetPlayWhenReady(bool),
    SeekTo(u64),
    Stop,
    Release,
    SetRendererEnabled(TrackType, bool),
    SendMessage(RecordedTarget, EngineMessage),
    BlockingSendMessage(RecordedTarget, EngineMessage),
}

#[derive(Debug)]
struct EngineShared {
    state: PlaybackState,
    play_when_ready: bool,
    position_ms: u64,
    duration_ms: Option<u64>,
    buffered_percentage: u8,
    enabled: PerTrack<bool>,
    has_media: PerTrack<bool>,
    calls: Vec<EngineCall>,
    sink: Option<EventSink>,
    /// Playback thread drops acknowledgements instead of sending them
    withhold_acks: bool,
}

impl EngineShared {
    fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn emit_state(&self) {
        self.emit(EngineEvent::StateChanged {
            play_when_ready: self.play_when_ready,
            state: self.state,
        });
    }
}

fn lock(shared: &Mutex<EngineShared>) -> MutexGuard<'_, EngineShared> {
    // A panicking renderer must not take the recorder down with it
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum PlaybackMsg {
    Prepare(PerTrack<RendererSlot>),
    Deliver {
        target: MessageTarget,
        message: EngineMessage,
        ack: Option<std_mpsc::Sender<Result<()>>>,
    },
    Stop,
    Release,
}

/// Observation and control handle for a [`SimulatedEngine`]
#[derive(Debug, Clone)]
pub struct EngineProbe {
    shared: Arc<Mutex<EngineShared>>,
}

impl EngineProbe {
    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.shared).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.shared).calls.clear();
    }

    pub fn state(&self) -> PlaybackState {
        lock(&self.shared).state
    }

    /// Move the engine to a state and report it, as the playback thread would
    pub fn set_state(&self, state: PlaybackState) {
        let mut shared = lock(&self.shared);
        shared.state = state;
        shared.emit_state();
    }

    pub fn set_duration(&self, duration_ms: Option<u64>) {
        lock(&self.shared).duration_ms = duration_ms;
    }

    pub fn set_buffered_percentage(&self, percentage: u8) {
        lock(&self.shared).buffered_percentage = percentage.min(100);
    }

    pub fn renderer_enabled(&self, track: TrackType) -> bool {
        lock(&self.shared).enabled[track]
    }

    /// Make blocking messages fail as if the playback thread went away
    pub fn withhold_acks(&self, withhold: bool) {
        lock(&self.shared).withhold_acks = withhold;
    }

    /// Raise an event as if it came from the engine or a source
    pub fn emit(&self, event: EngineEvent) {
        lock(&self.shared).emit(event);
    }
}

/// Playback engine with a real playback thread and a call recorder
pub struct SimulatedEngine {
    shared: Arc<Mutex<EngineShared>>,
    tx: std_mpsc::Sender<PlaybackMsg>,
    thread: Option<JoinHandle<()>>,
    ack_timeout: Duration,
}

impl SimulatedEngine {
    /// Engine that stays idle after `prepare` until driven through its probe
    pub fn new(config: &SessionConfig) -> Self {
        Self::spawn(config, false)
    }

    /// Engine that walks preparing, buffering and ready on its own after `prepare`
    pub fn auto_advancing(config: &SessionConfig) -> Self {
        Self::spawn(config, true)
    }

    fn spawn(config: &SessionConfig, auto_advance: bool) -> Self {
        let shared = Arc::new(Mutex::new(EngineShared {
            state: PlaybackState::Idle,
            play_when_ready: false,
            position_ms: 0,
            duration_ms: None,
            buffered_percentage: 0,
            enabled: PerTrack::default(),
            has_media: PerTrack::default(),
            calls: Vec::new(),
            sink: None,
            withhold_acks: false,
        }));

        let (tx, rx) = std_mpsc::channel();
        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("tracklane-playback".into())
            .spawn(move || playback_loop(rx, thread_shared, auto_advance))
            .ok();
        if thread.is_none() {
            warn!("Failed to spawn playback thread");
        }

        debug!(
            min_buffer_ms = config.min_buffer_ms,
            min_rebuffer_ms = config.min_rebuffer_ms,
            auto_advance,
            "Simulated engine started"
        );

        Self {
            shared,
            tx,
            thread,
            ack_timeout: config.surface_ack_timeout(),
        }
    }

    pub fn probe(&self) -> EngineProbe {
        EngineProbe {
            shared: self.shared.clone(),
        }
    }

    fn record(&self, call: EngineCall) {
        lock(&self.shared).calls.push(call);
    }
}

fn playback_loop(
    rx: std_mpsc::Receiver<PlaybackMsg>,
    shared: Arc<Mutex<EngineShared>>,
    auto_advance: bool,
) {
    let mut renderers: Option<PerTrack<RendererSlot>> = None;

    while let Ok(msg) = rx.recv() {
        match msg {
            PlaybackMsg::Prepare(slots) => {
                renderers = Some(slots);
                if auto_advance {
                    let mut guard = lock(&shared);
                    for state in [PlaybackState::Preparing, PlaybackState::Buffering, PlaybackState::Ready] {
                        guard.state = state;
                        guard.emit_state();
                    }
                    guard.buffered_percentage = 100;
                }
            }
            PlaybackMsg::Deliver { target, message, ack } => {
                let result = match &target {
                    MessageTarget::Renderer(track) => match renderers.as_mut() {
                        Some(slots) => slots[*track].handle_message(&message),
                        None => Ok(()),
                    },
                    MessageTarget::Source(source) => message.apply_to_source(source.as_ref()),
                };
                if let Err(error) = &result {
                    lock(&shared).emit(EngineEvent::PlayerError(Error::playback(error.to_string())));
                }
                if let EngineMessage::SetSurface(Some(surface)) = &message {
                    lock(&shared).emit(EngineEvent::DrawnToSurface(surface.clone()));
                }
                if let Some(ack) = ack {
                    if lock(&shared).withhold_acks {
                        drop(ack);
                    } else {
                        let _ = ack.send(result);
                    }
                }
            }
            PlaybackMsg::Stop => {
                renderers = None;
                let mut guard = lock(&shared);
                guard.state = PlaybackState::Idle;
                guard.emit_state();
            }
            PlaybackMsg::Release => break,
        }
    }
    debug!("Playback thread finished");
}

impl PlaybackEngine for SimulatedEngine {
    fn set_event_sink(&mut self, sink: EventSink) {
        lock(&self.shared).sink = Some(sink);
    }

    fn prepare(&mut self, renderers: PerTrack<RendererSlot>) {
        let absent = renderers
            .iter()
            .filter(|(_, slot)| slot.is_absent())
            .map(|(track, _)| track)
            .collect();
        {
            let mut shared = lock(&self.shared);
            shared.calls.push(EngineCall::Prepare { absent });
            shared.has_media = PerTrack::from_fn(|track| !renderers[track].is_absent());
        }
        if self.tx.send(PlaybackMsg::Prepare(renderers)).is_err() {
            warn!("Playback thread gone; prepare dropped");
        }
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool) {
        let mut shared = lock(&self.shared);
        shared.calls.push(EngineCall::SetPlayWhenReady(play_when_ready));
        if shared.play_when_ready != play_when_ready {
            shared.play_when_ready = play_when_ready;
            shared.emit_state();
        }
    }

    fn play_when_ready(&self) -> bool {
        lock(&self.shared).play_when_ready
    }

    fn seek_to(&mut self, position_ms: u64) {
        let mut shared = lock(&self.shared);
        shared.calls.push(EngineCall::SeekTo(position_ms));
        shared.position_ms = match shared.duration_ms {
            Some(duration) => position_ms.min(duration),
            None => position_ms,
        };
    }

    fn stop(&mut self) {
        {
            let mut shared = lock(&self.shared);
            shared.calls.push(EngineCall::Stop);
            shared.has_media = PerTrack::default();
        }
        let _ = self.tx.send(PlaybackMsg::Stop);
    }

    fn release(&mut self) {
        self.record(EngineCall::Release);
        let _ = self.tx.send(PlaybackMsg::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Playback thread panicked");
            }
        }
        let mut shared = lock(&self.shared);
        shared.state = PlaybackState::Idle;
        shared.has_media = PerTrack::default();
        shared.sink = None;
    }

    fn playback_state(&self) -> PlaybackState {
        lock(&self.shared).state
    }

    fn current_position(&self) -> u64 {
        lock(&self.shared).position_ms
    }

    fn duration(&self) -> Option<u64> {
        lock(&self.shared).duration_ms
    }

    fn buffered_percentage(&self) -> u8 {
        lock(&self.shared).buffered_percentage
    }

    fn renderer_has_media(&self, track: TrackType) -> bool {
        lock(&self.shared).has_media[track]
    }

    fn set_renderer_enabled(&mut self, track: TrackType, enabled: bool) {
        let mut shared = lock(&self.shared);
        shared.calls.push(EngineCall::SetRendererEnabled(track, enabled));
        shared.enabled[track] = enabled;
    }

    fn send_message(&mut self, target: MessageTarget, message: EngineMessage) {
        self.record(EngineCall::SendMessage(RecordedTarget::from(&target), message.clone()));
        if self.tx.send(PlaybackMsg::Deliver { target, message, ack: None }).is_err() {
            warn!("Playback thread gone; message dropped");
        }
    }

    fn blocking_send_message(&mut self, target: MessageTarget, message: EngineMessage) -> Result<()> {
        self.record(EngineCall::BlockingSendMessage(RecordedTarget::from(&target), message.clone()));
        let (ack_tx, ack_rx) = std_mpsc::channel();
        self.tx
            .send(PlaybackMsg::Deliver { target, message, ack: Some(ack_tx) })
            .map_err(|_| Error::EngineShutdown)?;
        match ack_rx.recv_timeout(self.ack_timeout) {
            Ok(result) => result,
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(Error::AcknowledgeTimeout {
                timeout_ms: self.ack_timeout.as_millis() as u64,
            }),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(Error::EngineShutdown),
        }
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        let _ = self.tx.send(PlaybackMsg::Release);
    }
}

/// Renderer that records the surface it was given
#[derive(Debug)]
pub struct SimulatedRenderer {
    name: String,
    counters: Option<Arc<CodecCounters>>,
    surface: Arc<Mutex<Option<Surface>>>,
}

impl SimulatedRenderer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: None,
            surface: Arc::new(Mutex::new(None)),
        }
    }

    /// Renderer backed by a (simulated) codec
    pub fn with_codec(name: impl Into<String>) -> Self {
        Self {
            counters: Some(Arc::new(CodecCounters::new())),
            ..Self::new(name)
        }
    }

    /// Handle that keeps observing the surface after the renderer moves
    pub fn surface_handle(&self) -> Arc<Mutex<Option<Surface>>> {
        self.surface.clone()
    }
}

impl Renderer for SimulatedRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn codec_counters(&self) -> Option<Arc<CodecCounters>> {
        self.counters.clone()
    }

    fn handle_message(&mut self, message: &EngineMessage) -> Result<()> {
        match message {
            EngineMessage::SetSurface(surface) => {
                *self.surface.lock().unwrap_or_else(|p| p.into_inner()) = surface.clone();
                Ok(())
            }
            EngineMessage::SelectTrack(_) => {
                Err(Error::playback(format!("{} cannot switch tracks", self.name)))
            }
        }
    }
}

/// Multi-track source over a fixed list of tracks
#[derive(Debug)]
pub struct SimulatedSource {
    tracks: usize,
    selected: AtomicUsize,
}

impl SimulatedSource {
    pub fn new(tracks: usize) -> Self {
        Self {
            tracks,
            selected: AtomicUsize::new(0),
        }
    }
}

impl MultiTrackSource for SimulatedSource {
    fn track_count(&self) -> usize {
        self.tracks
    }

    fn selected_track(&self) -> usize {
        self.selected.load(Ordering::SeqCst)
    }

    fn select_track(&self, index: usize) -> Result<()> {
        self.selected.store(index, Ordering::SeqCst);
        Ok(())
    }
}

/// Bandwidth meter with a constant estimate
#[derive(Debug, Clone, Copy)]
pub struct FixedBandwidthMeter(pub Option<u64>);

impl BandwidthMeter for FixedBandwidthMeter {
    fn bitrate_estimate(&self) -> Option<u64> {
        self.0
    }
}

type BuildFn = dyn Fn() -> Result<BuiltRenderers> + Send + Sync;

/// Counters shared by a [`ScriptedBuilder`] and its observers
#[derive(Debug, Default)]
pub struct BuilderStats {
    pub builds_started: AtomicUsize,
    pub cancels: AtomicUsize,
    pub delivered: AtomicUsize,
}

/// Builder that runs a factory after a delay
pub struct ScriptedBuilder {
    factory: Arc<BuildFn>,
    delay: Duration,
    current: Option<CancellationToken>,
    stats: Arc<BuilderStats>,
}

impl ScriptedBuilder {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<BuiltRenderers> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            delay: Duration::ZERO,
            current: None,
            stats: Arc::new(BuilderStats::default()),
        }
    }

    /// Builder that always fails with the given message
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move || Err(Error::build(message.clone())))
    }

    /// Builder producing a typical track layout for the protocol
    pub fn for_content(content_type: ContentType) -> Self {
        Self::new(move || Ok(demo_renderers(content_type)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<BuilderStats> {
        self.stats.clone()
    }
}

impl RendererBuilder for ScriptedBuilder {
    fn build_renderers(&mut self, request: BuildRequest) {
        self.stats.builds_started.fetch_add(1, Ordering::SeqCst);

        let own = CancellationToken::new();
        self.current = Some(own.clone());
        let cancelled = own.clone();
        let factory = self.factory.clone();
        let stats = self.stats.clone();
        let delay = self.delay;

        let finish = move |request: BuildRequest| {
            if own.is_cancelled() {
                return;
            }
            let delivered = match factory() {
                Ok(renderers) => request.complete(renderers),
                Err(error) => request.fail(error),
            };
            if delivered {
                stats.delivered.fetch_add(1, Ordering::SeqCst);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let revoked = request.cancellation_token();
                handle.spawn(async move {
                    tokio::select! {
                        _ = revoked.cancelled() => debug!("Build revoked by session"),
                        _ = cancelled.cancelled() => debug!("Build cancelled by builder"),
                        _ = tokio::time::sleep(delay) => finish(request),
                    }
                });
            }
            // Without a runtime the build finishes inline; it still reaches the
            // session through its queue
            Err(_) => finish(request),
        }
    }

    fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
            self.stats.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Track layout typical for each protocol
pub fn demo_renderers(content_type: ContentType) -> BuiltRenderers {
    let base = BuiltRenderers::new()
        .with_renderer(TrackType::Video, Box::new(SimulatedRenderer::with_codec("video")))
        .with_renderer(TrackType::Audio, Box::new(SimulatedRenderer::with_codec("audio")))
        .with_bandwidth_meter(Arc::new(FixedBandwidthMeter(Some(2_500_000))));

    match content_type {
        ContentType::Dash | ContentType::SmoothStreaming => base
            .with_track_names(TrackType::Video, ["240p", "480p", "720p"])
            .with_source(TrackType::Video, Arc::new(SimulatedSource::new(3)))
            .with_track_names(TrackType::Audio, ["English", "Spanish"])
            .with_source(TrackType::Audio, Arc::new(SimulatedSource::new(2)))
            .with_track_names(TrackType::Text, ["English CC", "French"])
            .with_source(TrackType::Text, Arc::new(SimulatedSource::new(2)))
            .with_renderer(TrackType::Text, Box::new(SimulatedRenderer::new("text"))),
        ContentType::Hls => base
            .with_track_names(TrackType::Video, ["auto", "360p", "720p", "1080p"])
            .with_source(TrackType::Video, Arc::new(SimulatedSource::new(4)))
            .with_renderer(TrackType::Text, Box::new(SimulatedRenderer::new("eia608")))
            .with_renderer(TrackType::Metadata, Box::new(SimulatedRenderer::new("id3"))),
        ContentType::Other => base,
    }
}
