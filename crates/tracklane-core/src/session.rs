//! Playback Session - orchestrates renderer builds and the playback engine
//!
//! Coordinates:
//! - Asynchronous, cancellable renderer builds
//! - Track selection per track type
//! - Surface attachment to the video renderer
//! - A reported playback state that accounts for the build phase
//! - Event fan-out to the registered listeners

use crate::{
    builder::{BuiltRenderers, BuiltTables, RendererBuilder},
    config::SessionConfig,
    engine::{BandwidthMeter, EngineEvent, EngineMessage, MessageTarget, PlaybackEngine},
    error::{Error, Result},
    listener::{
        CaptionListener, InfoListener, InternalErrorListener, ListenerSet, MetadataListener,
        SessionListener,
    },
    queue::{BuildRequest, EventSink, SessionCommand},
    types::*,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Debugging snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct DebugSnapshot {
    pub session_id: SessionId,
    pub build_state: BuildState,
    pub playback_state: PlaybackState,
    pub play_when_ready: bool,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub buffered_percentage: u8,
    pub video_format: Option<Format>,
    pub bandwidth_estimate: Option<u64>,
    pub codec_counters: Option<CodecCountersSnapshot>,
    pub selected_tracks: PerTrack<TrackSelection>,
}

/// Playback session wrapping a [`PlaybackEngine`]
pub struct PlaybackSession {
    /// Unique session ID
    id: SessionId,
    config: SessionConfig,
    engine: Box<dyn PlaybackEngine>,
    builder: Box<dyn RendererBuilder>,
    /// Command queue drained on the caller's thread
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,

    build_state: BuildState,
    /// Incremented by every `prepare`; only the latest build is accepted
    generation: u64,
    build_token: Option<CancellationToken>,
    released: bool,

    last_reported_play_when_ready: bool,
    last_reported_state: PlaybackState,

    surface: Option<Surface>,
    /// Set once the video slot has been handed to the engine
    video_renderer_installed: bool,
    video_format: Option<Format>,
    codec_counters: Option<Arc<CodecCounters>>,
    bandwidth_meter: Option<Arc<dyn BandwidthMeter>>,
    /// Track names and multi-track sources of the current build
    tables: Option<BuiltTables>,
    selected: PerTrack<TrackSelection>,
    backgrounded: bool,
    video_track_to_restore: TrackSelection,

    listeners: ListenerSet,
    internal_error_listener: Option<Arc<dyn InternalErrorListener>>,
    info_listener: Option<Arc<dyn InfoListener>>,
    caption_listener: Option<Arc<dyn CaptionListener>>,
    metadata_listener: Option<Arc<dyn MetadataListener>>,
}

impl PlaybackSession {
    /// Create a session; the engine reports its events into the session queue
    pub fn new(
        config: SessionConfig,
        mut engine: Box<dyn PlaybackEngine>,
        builder: Box<dyn RendererBuilder>,
    ) -> Result<Self> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        engine.set_event_sink(EventSink::new(cmd_tx.clone()));

        let mut selected = PerTrack::from_fn(|_| TrackSelection::PRIMARY);
        selected[TrackType::Text] = config.initial_text_selection;

        let id = SessionId::new();
        info!(session_id = %id, "Playback session created");

        Ok(Self {
            id,
            config,
            engine,
            builder,
            cmd_tx,
            cmd_rx,
            build_state: BuildState::Idle,
            generation: 0,
            build_token: None,
            released: false,
            last_reported_play_when_ready: false,
            last_reported_state: PlaybackState::Idle,
            surface: None,
            video_renderer_installed: false,
            video_format: None,
            codec_counters: None,
            bandwidth_meter: None,
            tables: None,
            selected,
            backgrounded: false,
            video_track_to_restore: TrackSelection::PRIMARY,
            listeners: ListenerSet::new(),
            internal_error_listener: None,
            info_listener: None,
            caption_listener: None,
            metadata_listener: None,
        })
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn build_state(&self) -> BuildState {
        self.build_state
    }

    /// Sink for sources or engines created outside a build
    pub fn event_sink(&self) -> EventSink {
        EventSink::new(self.cmd_tx.clone())
    }

    // -------------------------------------------------------------------------
    // Listener registration
    // -------------------------------------------------------------------------

    pub fn add_listener(&mut self, listener: Arc<dyn SessionListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn SessionListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn set_internal_error_listener(&mut self, listener: Option<Arc<dyn InternalErrorListener>>) {
        self.internal_error_listener = listener;
    }

    pub fn set_info_listener(&mut self, listener: Option<Arc<dyn InfoListener>>) {
        self.info_listener = listener;
    }

    pub fn set_caption_listener(&mut self, listener: Option<Arc<dyn CaptionListener>>) {
        self.caption_listener = listener;
    }

    pub fn set_metadata_listener(&mut self, listener: Option<Arc<dyn MetadataListener>>) {
        self.metadata_listener = listener;
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Build renderers and hand them to the engine
    ///
    /// Any build still in flight is cancelled first; a previously built
    /// session stops the engine before rebuilding.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn prepare(&mut self) -> Result<()> {
        if self.released {
            return Err(Error::Released);
        }

        if self.build_state == BuildState::Built {
            self.engine.stop();
        }
        self.cancel_build();

        self.video_format = None;
        self.video_renderer_installed = false;
        self.codec_counters = None;
        self.bandwidth_meter = None;
        self.tables = None;
        self.build_state = BuildState::Building;
        self.maybe_report_state();

        self.generation += 1;
        let token = CancellationToken::new();
        self.build_token = Some(token.clone());
        info!(generation = self.generation, "Building renderers");

        let request = BuildRequest::new(self.generation, token, self.cmd_tx.clone());
        self.builder.build_renderers(request);
        Ok(())
    }

    /// Cancel any build, release the engine and refuse further preparation
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.cancel_build();
        self.build_state = BuildState::Idle;
        self.surface = None;
        self.video_renderer_installed = false;
        self.tables = None;
        self.engine.release();
        self.released = true;
        info!("Playback session released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn cancel_build(&mut self) {
        if let Some(token) = self.build_token.take() {
            token.cancel();
        }
        self.builder.cancel();
    }

    // -------------------------------------------------------------------------
    // Command queue
    // -------------------------------------------------------------------------

    /// Apply every queued callback without waiting; returns how many were applied
    pub fn dispatch_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.cmd_rx.try_recv() {
            self.handle_command(command);
            applied += 1;
        }
        applied
    }

    /// Wait for the next queued callback and apply it
    ///
    /// The session holds a sender of its own queue, so this waits for as long
    /// as nothing is queued. Bound it with a timeout when driving a session.
    pub async fn next_command(&mut self) {
        if let Some(command) = self.cmd_rx.recv().await {
            self.handle_command(command);
        }
    }

    /// Apply one callback on the caller's thread
    pub fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::RenderersBuilt { generation, renderers } => {
                if self.accepts_build(generation) {
                    self.on_renderers_built(renderers);
                } else {
                    debug!(generation, current = self.generation, "Ignoring stale renderers");
                }
            }
            SessionCommand::RenderersError { generation, error } => {
                if self.accepts_build(generation) {
                    self.on_renderers_error(error);
                } else {
                    debug!(generation, current = self.generation, %error, "Ignoring stale build error");
                }
            }
            SessionCommand::Engine(event) => self.handle_engine_event(event),
        }
    }

    fn accepts_build(&self, generation: u64) -> bool {
        !self.released
            && self.build_state == BuildState::Building
            && generation == self.generation
            && self.build_token.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    fn on_renderers_built(&mut self, built: BuiltRenderers) {
        let mut build = built.normalize();

        self.codec_counters = build.renderers[TrackType::Video]
            .renderer()
            .and_then(|r| r.codec_counters())
            .or_else(|| {
                build.renderers[TrackType::Audio]
                    .renderer()
                    .and_then(|r| r.codec_counters())
            });
        self.bandwidth_meter = build.bandwidth_meter.take();
        self.tables = Some(build.tables);
        self.build_token = None;

        // The slot is still ours, so the surface goes straight to it
        let surface = EngineMessage::SetSurface(self.surface.clone());
        if let Err(error) = build.renderers[TrackType::Video].handle_message(&surface) {
            warn!(%error, "Video renderer rejected surface");
        }
        self.video_renderer_installed = true;

        self.push_track_selection(TrackType::Video, true);
        self.push_track_selection(TrackType::Audio, true);
        self.push_track_selection(TrackType::Text, true);

        let absent: Vec<_> = build
            .renderers
            .iter()
            .filter(|(_, slot)| slot.is_absent())
            .map(|(track, _)| track)
            .collect();
        info!(generation = self.generation, ?absent, "Renderers built");

        self.engine.prepare(build.renderers);
        self.build_state = BuildState::Built;
    }

    fn on_renderers_error(&mut self, error: Error) {
        warn!(%error, "Renderer build failed");
        self.build_token = None;
        if let Some(listener) = &self.internal_error_listener {
            listener.on_renderer_initialization_error(&error);
        }
        for listener in self.listeners.iter() {
            listener.on_error(&error);
        }
        self.build_state = BuildState::Idle;
        self.maybe_report_state();
    }

    /// Translate one engine event into listener callbacks
    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        if self.released {
            trace!(kind = event.kind(), "Ignoring engine event after release");
            return;
        }

        match event {
            EngineEvent::StateChanged { .. } => self.maybe_report_state(),
            EngineEvent::PlayWhenReadyCommitted => trace!("Play-when-ready committed"),
            EngineEvent::PlayerError(error) => {
                warn!(%error, build_state = %self.build_state, "Playback failed");
                // An error queued before the latest prepare must not orphan its build
                if self.build_state == BuildState::Built {
                    self.build_state = BuildState::Idle;
                }
                for listener in self.listeners.iter() {
                    listener.on_error(&error);
                }
                self.maybe_report_state();
            }
            EngineEvent::VideoSizeChanged(size) => {
                for listener in self.listeners.iter() {
                    listener.on_video_size_changed(size);
                }
            }
            EngineEvent::DrawnToSurface(surface) => {
                trace!(surface = %surface.id, "Drawn to surface");
            }
            EngineEvent::DroppedFrames { count, elapsed_ms } => {
                if let Some(listener) = &self.info_listener {
                    listener.on_dropped_frames(count, elapsed_ms);
                }
            }
            EngineEvent::DecoderInitialized {
                decoder_name,
                elapsed_realtime_ms,
                initialization_duration_ms,
            } => {
                if let Some(listener) = &self.info_listener {
                    listener.on_decoder_initialized(&decoder_name, elapsed_realtime_ms, initialization_duration_ms);
                }
            }
            EngineEvent::DecoderInitializationError(error) => {
                if let Some(listener) = &self.internal_error_listener {
                    listener.on_decoder_initialization_error(&error);
                }
            }
            EngineEvent::CryptoError(error) => {
                if let Some(listener) = &self.internal_error_listener {
                    listener.on_crypto_error(&error);
                }
            }
            EngineEvent::AudioTrackInitializationError(error) => {
                if let Some(listener) = &self.internal_error_listener {
                    listener.on_audio_track_initialization_error(&error);
                }
            }
            EngineEvent::AudioTrackWriteError(error) => {
                if let Some(listener) = &self.internal_error_listener {
                    listener.on_audio_track_write_error(&error);
                }
            }
            EngineEvent::DrmSessionManagerError(error) => {
                if let Some(listener) = &self.internal_error_listener {
                    listener.on_drm_session_manager_error(&error);
                }
            }
            EngineEvent::LoadStarted(load) => {
                if let Some(listener) = &self.info_listener {
                    listener.on_load_started(&load);
                }
            }
            EngineEvent::LoadCompleted(load) => {
                if let Some(listener) = &self.info_listener {
                    listener.on_load_completed(&load);
                }
            }
            EngineEvent::LoadCanceled { source_id, bytes_loaded } => {
                trace!(source_id, bytes_loaded, "Load canceled");
            }
            EngineEvent::LoadError { source_id, error } => {
                if let Some(listener) = &self.internal_error_listener {
                    listener.on_load_error(source_id, &error);
                }
            }
            EngineEvent::UpstreamDiscarded { source_id, media_start_ms, media_end_ms } => {
                trace!(source_id, media_start_ms, media_end_ms, "Upstream discarded");
            }
            EngineEvent::DownstreamFormatChanged { track, format, trigger, media_time_ms } => {
                match track {
                    TrackType::Video => {
                        if let Some(listener) = &self.info_listener {
                            listener.on_video_format_enabled(&format, trigger, media_time_ms);
                        }
                        self.video_format = Some(format);
                    }
                    TrackType::Audio => {
                        if let Some(listener) = &self.info_listener {
                            listener.on_audio_format_enabled(&format, trigger, media_time_ms);
                        }
                    }
                    TrackType::Text | TrackType::Metadata => {}
                }
            }
            EngineEvent::BandwidthSample { elapsed_ms, bytes, bitrate_estimate } => {
                if let Some(listener) = &self.info_listener {
                    listener.on_bandwidth_sample(elapsed_ms, bytes, bitrate_estimate);
                }
            }
            EngineEvent::SeekRangeChanged(range) => {
                if let Some(listener) = &self.info_listener {
                    listener.on_seek_range_changed(range);
                }
            }
            EngineEvent::Cues(cues) => {
                if let Some(listener) = &self.caption_listener {
                    if self.selected[TrackType::Text].is_enabled() {
                        listener.on_cues(&cues);
                    }
                }
            }
            EngineEvent::Metadata(metadata) => {
                if let Some(listener) = &self.metadata_listener {
                    if self.selected[TrackType::Metadata].is_enabled() {
                        listener.on_metadata(&metadata);
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Playback control
    // -------------------------------------------------------------------------

    pub fn set_play_when_ready(&mut self, play_when_ready: bool) {
        self.engine.set_play_when_ready(play_when_ready);
    }

    pub fn play_when_ready(&self) -> bool {
        self.engine.play_when_ready()
    }

    pub fn seek_to(&mut self, position_ms: u64) {
        self.engine.seek_to(position_ms);
    }

    pub fn current_position(&self) -> u64 {
        self.engine.current_position()
    }

    pub fn duration(&self) -> Option<u64> {
        self.engine.duration()
    }

    pub fn buffered_percentage(&self) -> u8 {
        self.engine.buffered_percentage()
    }

    /// Playback state as observers should see it
    ///
    /// Reports `Preparing` while renderers are being built, and while built
    /// renderers have not yet been adopted by the playback thread.
    pub fn playback_state(&self) -> PlaybackState {
        match self.build_state {
            BuildState::Building => PlaybackState::Preparing,
            BuildState::Built => match self.engine.playback_state() {
                PlaybackState::Idle => PlaybackState::Preparing,
                state => state,
            },
            BuildState::Idle => self.engine.playback_state(),
        }
    }

    fn maybe_report_state(&mut self) {
        let play_when_ready = self.engine.play_when_ready();
        let state = self.playback_state();
        if play_when_ready == self.last_reported_play_when_ready && state == self.last_reported_state {
            return;
        }
        debug!(play_when_ready, %state, "Reporting state change");
        for listener in self.listeners.iter() {
            listener.on_state_changed(play_when_ready, state);
        }
        self.last_reported_play_when_ready = play_when_ready;
        self.last_reported_state = state;
    }

    // -------------------------------------------------------------------------
    // Tracks
    // -------------------------------------------------------------------------

    /// Number of tracks of a type; 0 when the content has no such media
    pub fn track_count(&self, track: TrackType) -> usize {
        if !self.engine.renderer_has_media(track) {
            return 0;
        }
        self.tables
            .as_ref()
            .map_or(0, |tables| tables.track_names[track].len())
    }

    /// Name of a track, `None` when out of range or unknown
    pub fn track_name(&self, track: TrackType, index: usize) -> Option<&str> {
        self.tables
            .as_ref()?
            .track_names[track]
            .get(index)?
            .as_deref()
    }

    pub fn selected_track(&self, track: TrackType) -> TrackSelection {
        self.selected[track]
    }

    /// Select a track of a type, or disable the type
    pub fn select_track(&mut self, track: TrackType, selection: TrackSelection) {
        if self.selected[track] == selection {
            return;
        }
        debug!(%track, from = %self.selected[track], to = %selection, "Selecting track");
        self.selected[track] = selection;
        self.push_track_selection(track, true);

        if track == TrackType::Text && selection == TrackSelection::Disabled {
            if let Some(listener) = &self.caption_listener {
                listener.on_cues(&[]);
            }
        }
    }

    fn push_track_selection(&mut self, track: TrackType, allow_renderer_enable: bool) {
        let Some(tables) = &self.tables else {
            trace!(%track, "Selection recorded; renderers not built yet");
            return;
        };
        let source = tables.sources[track].clone();

        match (self.selected[track], source) {
            (TrackSelection::Disabled, _) => {
                self.engine.set_renderer_enabled(track, false);
            }
            (TrackSelection::Track(_), None) => {
                self.engine.set_renderer_enabled(track, allow_renderer_enable);
            }
            (TrackSelection::Track(index), Some(source)) => {
                // Keep the engine from rendering a half-switched track
                let play_when_ready = self.engine.play_when_ready();
                self.engine.set_play_when_ready(false);
                self.engine.set_renderer_enabled(track, false);
                self.engine
                    .send_message(MessageTarget::Source(source), EngineMessage::SelectTrack(index));
                self.engine.set_renderer_enabled(track, allow_renderer_enable);
                self.engine.set_play_when_ready(play_when_ready);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Surface
    // -------------------------------------------------------------------------

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    /// Attach a surface, or detach with `None`, without waiting
    pub fn set_surface(&mut self, surface: Option<Surface>) {
        self.surface = surface;
        if let Err(error) = self.push_surface(false) {
            warn!(%error, "Surface push failed");
        }
    }

    /// Detach the surface and wait until the playback thread has let go of it
    pub fn blocking_clear_surface(&mut self) -> Result<()> {
        self.surface = None;
        self.push_surface(true)
    }

    fn push_surface(&mut self, blocking: bool) -> Result<()> {
        if !self.video_renderer_installed {
            return Ok(());
        }
        let target = MessageTarget::Renderer(TrackType::Video);
        let message = EngineMessage::SetSurface(self.surface.clone());
        if blocking {
            self.engine.blocking_send_message(target, message)
        } else {
            self.engine.send_message(target, message);
            Ok(())
        }
    }

    /// Move playback to or from the background
    ///
    /// Entering the background disables video and waits for the surface to be
    /// cleared; leaving it restores the video track selected before. While a
    /// build is outstanding the selection is recorded and applied once the
    /// renderers arrive.
    ///
    /// If the surface handshake fails the video selection is restored and the
    /// session stays in the foreground, so the call can be retried. The
    /// surface itself stays detached.
    pub fn set_backgrounded(&mut self, backgrounded: bool) -> Result<()> {
        if self.backgrounded == backgrounded {
            return Ok(());
        }
        if self.build_state == BuildState::Building {
            debug!(backgrounded, "Background change deferred until renderers are built");
        }

        if backgrounded {
            let restore = self.selected[TrackType::Video];
            self.select_track(TrackType::Video, TrackSelection::Disabled);
            if let Err(error) = self.blocking_clear_surface() {
                warn!(%error, "Surface handshake failed; staying in foreground");
                self.select_track(TrackType::Video, restore);
                return Err(error);
            }
            self.video_track_to_restore = restore;
        } else {
            self.select_track(TrackType::Video, self.video_track_to_restore);
        }
        self.backgrounded = backgrounded;
        Ok(())
    }

    pub fn is_backgrounded(&self) -> bool {
        self.backgrounded
    }

    // -------------------------------------------------------------------------
    // Debugging
    // -------------------------------------------------------------------------

    pub fn video_format(&self) -> Option<&Format> {
        self.video_format.as_ref()
    }

    pub fn bandwidth_meter(&self) -> Option<&Arc<dyn BandwidthMeter>> {
        self.bandwidth_meter.as_ref()
    }

    pub fn codec_counters(&self) -> Option<&Arc<CodecCounters>> {
        self.codec_counters.as_ref()
    }

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        DebugSnapshot {
            session_id: self.id,
            build_state: self.build_state,
            playback_state: self.playback_state(),
            play_when_ready: self.play_when_ready(),
            position_ms: self.current_position(),
            duration_ms: self.duration(),
            buffered_percentage: self.buffered_percentage(),
            video_format: self.video_format.clone(),
            bandwidth_estimate: self.bandwidth_meter.as_ref().and_then(|m| m.bitrate_estimate()),
            codec_counters: self.codec_counters.as_ref().map(|c| c.snapshot()),
            selected_tracks: self.selected.clone(),
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if let Some(token) = self.build_token.take() {
            token.cancel();
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::content::ContentType;
    use crate::sim::{EngineCall, EngineProbe, RecordedTarget, ScriptedBuilder, SimulatedEngine};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        states: Mutex<Vec<(bool, PlaybackState)>>,
        errors: Mutex<Vec<String>>,
        internal: Mutex<Vec<String>>,
        cues: Mutex<Vec<Vec<Cue>>>,
        metadata: Mutex<Vec<Metadata>>,
    }

    impl SessionListener for Recorded {
        fn on_state_changed(&self, play_when_ready: bool, state: PlaybackState) {
            self.states.lock().unwrap().push((play_when_ready, state));
        }

        fn on_error(&self, error: &Error) {
            self.errors.lock().unwrap().push(error.to_string());
        }

        fn on_video_size_changed(&self, _size: VideoSize) {}
    }

    impl InternalErrorListener for Recorded {
        fn on_renderer_initialization_error(&self, error: &Error) {
            self.internal.lock().unwrap().push(error.to_string());
        }
    }

    impl CaptionListener for Recorded {
        fn on_cues(&self, cues: &[Cue]) {
            self.cues.lock().unwrap().push(cues.to_vec());
        }
    }

    impl MetadataListener for Recorded {
        fn on_metadata(&self, metadata: &Metadata) {
            self.metadata.lock().unwrap().push(metadata.clone());
        }
    }

    /// Builder that parks requests until the test completes them
    #[derive(Default, Clone)]
    struct ManualBuilder {
        requests: Arc<Mutex<Vec<BuildRequest>>>,
        cancels: Arc<AtomicUsize>,
    }

    impl RendererBuilder for ManualBuilder {
        fn build_renderers(&mut self, request: BuildRequest) {
            self.requests.lock().unwrap().push(request);
        }

        fn cancel(&mut self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session_with(builder: impl RendererBuilder + 'static) -> (PlaybackSession, EngineProbe, Arc<Recorded>) {
        let config = SessionConfig::default();
        let engine = SimulatedEngine::new(&config);
        let probe = engine.probe();
        let mut session = PlaybackSession::new(config, Box::new(engine), Box::new(builder)).unwrap();
        let recorded = Arc::new(Recorded::default());
        session.add_listener(recorded.clone());
        session.set_internal_error_listener(Some(recorded.clone() as Arc<dyn InternalErrorListener>));
        session.set_caption_listener(Some(recorded.clone() as Arc<dyn CaptionListener>));
        session.set_metadata_listener(Some(recorded.clone() as Arc<dyn MetadataListener>));
        (session, probe, recorded)
    }

    fn built_dash() -> (PlaybackSession, EngineProbe, Arc<Recorded>) {
        let (mut session, probe, recorded) = session_with(ScriptedBuilder::for_content(ContentType::Dash));
        session.prepare().unwrap();
        session.dispatch_pending();
        assert_eq!(session.build_state(), BuildState::Built);
        (session, probe, recorded)
    }

    #[test]
    fn test_prepare_builds_and_prepares_engine() {
        let (session, probe, recorded) = built_dash();

        let prepares: Vec<_> = probe
            .calls()
            .into_iter()
            .filter(|call| matches!(call, EngineCall::Prepare { .. }))
            .collect();
        assert_eq!(prepares, vec![EngineCall::Prepare { absent: vec![TrackType::Metadata] }]);
        assert_eq!(session.track_count(TrackType::Video), 3);
        assert_eq!(session.track_count(TrackType::Metadata), 0);
        assert_eq!(session.track_name(TrackType::Audio, 1), Some("Spanish"));
        assert_eq!(session.track_name(TrackType::Audio, 5), None);
        assert!(session.codec_counters().is_some());
        assert_eq!(
            recorded.states.lock().unwrap().as_slice(),
            &[(false, PlaybackState::Preparing)]
        );
    }

    #[test]
    fn test_only_latest_prepare_is_accepted() {
        let builder = ManualBuilder::default();
        let (mut session, probe, _recorded) = session_with(builder.clone());

        session.prepare().unwrap();
        session.prepare().unwrap();
        let mut requests = std::mem::take(&mut *builder.requests.lock().unwrap());
        assert_eq!(requests.len(), 2);
        let second = requests.pop().unwrap();
        let first = requests.pop().unwrap();

        assert!(first.is_cancelled());
        assert!(builder.cancels.load(Ordering::SeqCst) >= 1);
        assert!(!first.complete(BuiltRenderers::new()));
        assert_eq!(session.dispatch_pending(), 0);
        assert_eq!(session.build_state(), BuildState::Building);

        assert!(second.complete(BuiltRenderers::new()));
        session.dispatch_pending();
        assert_eq!(session.build_state(), BuildState::Built);
        let prepares = probe
            .calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::Prepare { .. }))
            .count();
        assert_eq!(prepares, 1);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let builder = ManualBuilder::default();
        let (mut session, _probe, recorded) = session_with(builder.clone());
        session.prepare().unwrap();
        session.prepare().unwrap();

        session.handle_command(SessionCommand::RenderersError {
            generation: 1,
            error: Error::build("stale"),
        });
        assert_eq!(session.build_state(), BuildState::Building);
        assert!(recorded.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_all_absent_build_prepares_full_array() {
        let (mut session, probe, _recorded) = session_with(ScriptedBuilder::new(|| Ok(BuiltRenderers::new())));
        session.prepare().unwrap();
        session.dispatch_pending();

        assert!(probe.calls().contains(&EngineCall::Prepare { absent: TrackType::ALL.to_vec() }));
        for track in TrackType::ALL {
            assert_eq!(session.track_count(track), 0);
            assert_eq!(session.track_name(track, 0), None);
        }
        assert!(session.bandwidth_meter().is_none());
    }

    #[test]
    fn test_playback_state_while_building() {
        let builder = ManualBuilder::default();
        let (mut session, probe, recorded) = session_with(builder.clone());
        assert_eq!(session.playback_state(), PlaybackState::Idle);

        session.prepare().unwrap();
        assert_eq!(session.playback_state(), PlaybackState::Preparing);

        let request = builder.requests.lock().unwrap().pop().unwrap();
        request.complete(BuiltRenderers::new());
        session.dispatch_pending();
        assert_eq!(probe.state(), PlaybackState::Idle);
        assert_eq!(session.playback_state(), PlaybackState::Preparing);

        probe.set_state(PlaybackState::Buffering);
        probe.set_state(PlaybackState::Buffering);
        probe.set_state(PlaybackState::Ready);
        session.dispatch_pending();
        assert_eq!(
            recorded.states.lock().unwrap().as_slice(),
            &[
                (false, PlaybackState::Preparing),
                (false, PlaybackState::Buffering),
                (false, PlaybackState::Ready),
            ]
        );
    }

    #[test]
    fn test_track_switch_pauses_and_restores() {
        let (mut session, probe, _recorded) = built_dash();
        session.set_play_when_ready(true);
        probe.clear_calls();

        session.select_track(TrackType::Video, TrackSelection::Track(2));

        assert_eq!(
            probe.calls(),
            vec![
                EngineCall::SetPlayWhenReady(false),
                EngineCall::SetRendererEnabled(TrackType::Video, false),
                EngineCall::SendMessage(RecordedTarget::Source, EngineMessage::SelectTrack(2)),
                EngineCall::SetRendererEnabled(TrackType::Video, true),
                EngineCall::SetPlayWhenReady(true),
            ]
        );
        assert!(session.play_when_ready());
        assert_eq!(session.selected_track(TrackType::Video), TrackSelection::Track(2));
    }

    #[test]
    fn test_same_selection_is_a_no_op() {
        let (mut session, probe, _recorded) = built_dash();
        probe.clear_calls();
        session.select_track(TrackType::Audio, TrackSelection::PRIMARY);
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn test_disabling_text_clears_cues() {
        let (mut session, probe, recorded) = built_dash();
        assert_eq!(session.selected_track(TrackType::Text), TrackSelection::Disabled);

        probe.emit(EngineEvent::Cues(vec![Cue::new("hidden")]));
        session.dispatch_pending();
        assert!(recorded.cues.lock().unwrap().is_empty());

        session.select_track(TrackType::Text, TrackSelection::PRIMARY);
        probe.emit(EngineEvent::Cues(vec![Cue::new("shown")]));
        session.dispatch_pending();
        session.select_track(TrackType::Text, TrackSelection::Disabled);

        let cues = recorded.cues.lock().unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0][0].text, "shown");
        assert!(cues[1].is_empty());
    }

    #[test]
    fn test_metadata_gated_by_selection() {
        let (mut session, probe, recorded) = built_dash();
        let mut metadata = Metadata::new();
        metadata.insert("TIT2".into(), serde_json::json!("Intro"));

        probe.emit(EngineEvent::Metadata(metadata.clone()));
        session.dispatch_pending();
        session.select_track(TrackType::Metadata, TrackSelection::Disabled);
        probe.emit(EngineEvent::Metadata(metadata.clone()));
        session.dispatch_pending();

        assert_eq!(recorded.metadata.lock().unwrap().as_slice(), &[metadata]);
    }

    #[test]
    fn test_background_round_trip() {
        let (mut session, probe, _recorded) = built_dash();
        session.set_surface(Some(Surface::new("main")));
        session.select_track(TrackType::Video, TrackSelection::Track(1));
        probe.clear_calls();

        session.set_backgrounded(true).unwrap();
        assert!(session.is_backgrounded());
        assert_eq!(session.selected_track(TrackType::Video), TrackSelection::Disabled);
        assert!(session.surface().is_none());
        assert!(probe.calls().contains(&EngineCall::BlockingSendMessage(
            RecordedTarget::Renderer(TrackType::Video),
            EngineMessage::SetSurface(None),
        )));
        assert!(!probe.renderer_enabled(TrackType::Video));

        session.set_backgrounded(false).unwrap();
        assert_eq!(session.selected_track(TrackType::Video), TrackSelection::Track(1));
        assert!(probe.renderer_enabled(TrackType::Video));
    }

    #[test]
    fn test_background_while_building_is_deferred() {
        let builder = ManualBuilder::default();
        let (mut session, probe, _recorded) = session_with(builder.clone());
        session.prepare().unwrap();

        session.set_backgrounded(true).unwrap();
        assert!(probe.calls().is_empty());

        builder
            .requests
            .lock()
            .unwrap()
            .pop()
            .unwrap()
            .complete(crate::sim::demo_renderers(ContentType::Hls));
        session.dispatch_pending();
        assert!(probe.calls().contains(&EngineCall::SetRendererEnabled(TrackType::Video, false)));
    }

    #[test]
    fn test_surface_before_build_goes_to_renderer() {
        let (mut session, probe, _recorded) = session_with(ScriptedBuilder::for_content(ContentType::Other));
        session.set_surface(Some(Surface::new("early")));
        assert!(probe.calls().is_empty());

        session.prepare().unwrap();
        session.dispatch_pending();
        let surface_messages = probe
            .calls()
            .into_iter()
            .filter(|call| matches!(call, EngineCall::SendMessage(RecordedTarget::Renderer(_), _)))
            .count();
        assert_eq!(surface_messages, 0);

        let late = Surface::new("late");
        session.set_surface(Some(late.clone()));
        assert!(probe.calls().contains(&EngineCall::SendMessage(
            RecordedTarget::Renderer(TrackType::Video),
            EngineMessage::SetSurface(Some(late)),
        )));
    }

    #[test]
    fn test_build_error_fans_out() {
        let (mut session, _probe, recorded) = session_with(ScriptedBuilder::failing("no decoder for hevc"));
        session.prepare().unwrap();
        session.dispatch_pending();

        assert_eq!(session.build_state(), BuildState::Idle);
        assert_eq!(recorded.internal.lock().unwrap().len(), 1);
        assert_eq!(recorded.errors.lock().unwrap().len(), 1);
        assert!(recorded.errors.lock().unwrap()[0].contains("hevc"));
        assert_eq!(
            recorded.states.lock().unwrap().as_slice(),
            &[(false, PlaybackState::Preparing), (false, PlaybackState::Idle)]
        );
    }

    #[test]
    fn test_player_error_resets_build_state() {
        let (mut session, probe, recorded) = built_dash();
        probe.emit(EngineEvent::PlayerError(Error::playback("decoder crashed")));
        session.dispatch_pending();

        assert_eq!(session.build_state(), BuildState::Idle);
        assert_eq!(recorded.errors.lock().unwrap().len(), 1);
        assert_eq!(
            recorded.states.lock().unwrap().last(),
            Some(&(false, PlaybackState::Idle))
        );
    }

    #[test]
    fn test_queued_player_error_keeps_pending_build() {
        let builder = ManualBuilder::default();
        let (mut session, probe, recorded) = session_with(builder.clone());
        session.prepare().unwrap();

        probe.emit(EngineEvent::PlayerError(Error::playback("stale decoder failure")));
        session.dispatch_pending();
        assert_eq!(session.build_state(), BuildState::Building);
        assert_eq!(session.playback_state(), PlaybackState::Preparing);
        assert_eq!(recorded.errors.lock().unwrap().len(), 1);

        let request = builder.requests.lock().unwrap().pop().unwrap();
        assert!(request.complete(crate::sim::demo_renderers(ContentType::Dash)));
        session.dispatch_pending();

        assert_eq!(session.build_state(), BuildState::Built);
        let prepares = probe
            .calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::Prepare { .. }))
            .count();
        assert_eq!(prepares, 1);
        assert_eq!(
            recorded.states.lock().unwrap().as_slice(),
            &[(false, PlaybackState::Preparing)]
        );
    }

    #[test]
    fn test_disabling_text_without_prior_cues() {
        let (mut session, _probe, recorded) = built_dash();
        session.select_track(TrackType::Text, TrackSelection::PRIMARY);
        session.select_track(TrackType::Text, TrackSelection::Disabled);

        assert_eq!(*recorded.cues.lock().unwrap(), vec![Vec::<Cue>::new()]);
    }

    #[test]
    fn test_disabling_text_before_any_build() {
        let (mut session, probe, recorded) = session_with(ManualBuilder::default());
        session.select_track(TrackType::Text, TrackSelection::PRIMARY);
        session.select_track(TrackType::Text, TrackSelection::Disabled);

        assert_eq!(*recorded.cues.lock().unwrap(), vec![Vec::<Cue>::new()]);
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn test_failed_surface_handshake_stays_in_foreground() {
        let (mut session, probe, _recorded) = built_dash();
        session.set_surface(Some(Surface::new("main")));
        probe.withhold_acks(true);

        let err = session.set_backgrounded(true).unwrap_err();
        assert!(matches!(err, Error::EngineShutdown));
        assert!(!session.is_backgrounded());
        assert_eq!(session.selected_track(TrackType::Video), TrackSelection::PRIMARY);
        assert!(probe.renderer_enabled(TrackType::Video));

        probe.withhold_acks(false);
        session.set_backgrounded(true).unwrap();
        assert!(session.is_backgrounded());
        session.set_backgrounded(false).unwrap();
        assert_eq!(session.selected_track(TrackType::Video), TrackSelection::PRIMARY);
    }

    #[tokio::test]
    async fn test_next_command_waits_for_work() {
        let (mut session, probe, _recorded) = session_with(ManualBuilder::default());
        let idle = tokio::time::timeout(Duration::from_millis(20), session.next_command()).await;
        assert!(idle.is_err());

        probe.set_state(PlaybackState::Buffering);
        let applied = tokio::time::timeout(Duration::from_secs(1), session.next_command()).await;
        assert!(applied.is_ok());
    }

    #[test]
    fn test_video_format_cached_without_info_listener() {
        let (mut session, probe, _recorded) = built_dash();
        let format = Format::video("v2", "video/avc", 1280, 720, 2_000_000);
        probe.emit(EngineEvent::DownstreamFormatChanged {
            track: TrackType::Video,
            format: format.clone(),
            trigger: Trigger::Adaptive,
            media_time_ms: 4000,
        });
        session.dispatch_pending();
        assert_eq!(session.video_format(), Some(&format));

        session.prepare().unwrap();
        assert!(session.video_format().is_none());
    }

    #[test]
    fn test_rebuild_stops_engine() {
        let (mut session, probe, _recorded) = built_dash();
        probe.clear_calls();
        session.prepare().unwrap();
        assert_eq!(probe.calls().first(), Some(&EngineCall::Stop));
        assert_eq!(session.track_count(TrackType::Video), 0);
        session.dispatch_pending();
        assert_eq!(session.build_state(), BuildState::Built);
    }

    #[test]
    fn test_release_is_terminal() {
        let (mut session, probe, recorded) = built_dash();
        session.release();
        session.release();

        assert!(session.is_released());
        assert!(matches!(session.prepare(), Err(Error::Released)));
        let releases = probe.calls().iter().filter(|c| **c == EngineCall::Release).count();
        assert_eq!(releases, 1);

        let before = recorded.states.lock().unwrap().len();
        session.handle_engine_event(EngineEvent::StateChanged {
            play_when_ready: true,
            state: PlaybackState::Ready,
        });
        assert_eq!(recorded.states.lock().unwrap().len(), before);
    }

    #[test]
    fn test_debug_snapshot() {
        let (mut session, _probe, _recorded) = built_dash();
        session.seek_to(2500);
        let snapshot = session.debug_snapshot();
        assert_eq!(snapshot.build_state, BuildState::Built);
        assert_eq!(snapshot.position_ms, 2500);
        assert_eq!(snapshot.bandwidth_estimate, Some(2_500_000));
        assert_eq!(snapshot.selected_tracks[TrackType::Text], TrackSelection::Disabled);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["build_state"], "built");
    }
}
