//! Playback engine seam
//!
//! The session never decodes anything itself. It drives a [`PlaybackEngine`]
//! that owns the renderers once they are prepared and runs them on its own
//! playback thread. Everything the engine and the sources it feeds want to
//! report comes back as an [`EngineEvent`] through an
//! [`EventSink`](crate::queue::EventSink).

use crate::{
    error::{Error, Result},
    queue::EventSink,
    types::*,
};
use std::fmt::Debug;
use std::sync::Arc;

/// One per-type pipeline stage that decodes and presents a track
pub trait Renderer: Send + Debug {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Decoder counters, for renderers backed by a codec
    fn codec_counters(&self) -> Option<Arc<CodecCounters>> {
        None
    }

    /// Apply a control message on the playback thread
    fn handle_message(&mut self, message: &EngineMessage) -> Result<()>;
}

/// Renderer slot for one track type
#[derive(Debug)]
pub enum RendererSlot {
    /// A renderer was built for the type
    Active(Box<dyn Renderer>),
    /// No media of this type; the engine treats the slot as a no-op renderer
    Absent,
}

impl RendererSlot {
    pub fn is_absent(&self) -> bool {
        matches!(self, RendererSlot::Absent)
    }

    pub fn renderer(&self) -> Option<&dyn Renderer> {
        match self {
            RendererSlot::Active(renderer) => Some(renderer.as_ref()),
            RendererSlot::Absent => None,
        }
    }

    /// Deliver a message; an absent renderer accepts and ignores everything
    pub fn handle_message(&mut self, message: &EngineMessage) -> Result<()> {
        match self {
            RendererSlot::Active(renderer) => renderer.handle_message(message),
            RendererSlot::Absent => Ok(()),
        }
    }
}

impl From<Option<Box<dyn Renderer>>> for RendererSlot {
    fn from(renderer: Option<Box<dyn Renderer>>) -> Self {
        match renderer {
            Some(renderer) => RendererSlot::Active(renderer),
            None => RendererSlot::Absent,
        }
    }
}

/// A source able to switch among several tracks of one type
pub trait MultiTrackSource: Send + Sync + Debug {
    fn track_count(&self) -> usize;

    /// Currently selected track index
    fn selected_track(&self) -> usize;

    /// Switch tracks; called by the engine on its playback thread
    fn select_track(&self, index: usize) -> Result<()>;
}

/// Provides an estimate of the currently available bandwidth
pub trait BandwidthMeter: Send + Sync + Debug {
    /// Estimated bitrate in bits per second, if enough samples were seen
    fn bitrate_estimate(&self) -> Option<u64>;
}

/// Receiver of a control message
#[derive(Debug, Clone)]
pub enum MessageTarget {
    /// The prepared renderer of a track type
    Renderer(TrackType),
    /// A multi-track source
    Source(Arc<dyn MultiTrackSource>),
}

/// Control messages delivered on the playback thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Attach or detach the video output surface
    SetSurface(Option<Surface>),
    /// Switch a multi-track source to the given track
    SelectTrack(usize),
}

impl EngineMessage {
    /// Apply the message to a source target
    pub fn apply_to_source(&self, source: &dyn MultiTrackSource) -> Result<()> {
        match self {
            EngineMessage::SelectTrack(index) => {
                if *index >= source.track_count() {
                    return Err(Error::playback(format!(
                        "track {} out of range ({} tracks)",
                        index,
                        source.track_count()
                    )));
                }
                source.select_track(*index)
            }
            EngineMessage::SetSurface(_) => Ok(()),
        }
    }
}

/// Multi-renderer playback engine consumed by the session
pub trait PlaybackEngine: Send {
    /// Route engine events into the owning session
    fn set_event_sink(&mut self, sink: EventSink);

    /// Install the full renderer array and start preparing
    fn prepare(&mut self, renderers: PerTrack<RendererSlot>);

    fn set_play_when_ready(&mut self, play_when_ready: bool);

    fn play_when_ready(&self) -> bool;

    fn seek_to(&mut self, position_ms: u64);

    /// Stop playback and drop the installed renderers
    fn stop(&mut self);

    /// Shut down the playback thread
    fn release(&mut self);

    fn playback_state(&self) -> PlaybackState;

    fn current_position(&self) -> u64;

    /// Media duration in milliseconds, `None` when unknown
    fn duration(&self) -> Option<u64>;

    fn buffered_percentage(&self) -> u8;

    /// Whether the prepared renderer for the type has media to play
    fn renderer_has_media(&self, track: TrackType) -> bool;

    fn set_renderer_enabled(&mut self, track: TrackType, enabled: bool);

    /// Queue a message for the playback thread and return immediately
    fn send_message(&mut self, target: MessageTarget, message: EngineMessage);

    /// Queue a message and wait until the playback thread has applied it
    fn blocking_send_message(&mut self, target: MessageTarget, message: EngineMessage) -> Result<()>;
}

/// Events raised by the engine, its renderers and the sources feeding them
#[derive(Debug)]
pub enum EngineEvent {
    StateChanged {
        play_when_ready: bool,
        state: PlaybackState,
    },
    PlayWhenReadyCommitted,
    /// Unrecoverable failure on the playback thread
    PlayerError(Error),
    VideoSizeChanged(VideoSize),
    DrawnToSurface(Surface),
    DroppedFrames {
        count: u32,
        elapsed_ms: u64,
    },
    DecoderInitialized {
        decoder_name: String,
        elapsed_realtime_ms: u64,
        initialization_duration_ms: u64,
    },
    DecoderInitializationError(Error),
    CryptoError(Error),
    AudioTrackInitializationError(Error),
    AudioTrackWriteError(Error),
    DrmSessionManagerError(Error),
    LoadStarted(LoadStart),
    LoadCompleted(LoadCompletion),
    LoadCanceled {
        source_id: u32,
        bytes_loaded: u64,
    },
    LoadError {
        source_id: u32,
        error: Error,
    },
    UpstreamDiscarded {
        source_id: u32,
        media_start_ms: u64,
        media_end_ms: u64,
    },
    DownstreamFormatChanged {
        track: TrackType,
        format: Format,
        trigger: Trigger,
        media_time_ms: u64,
    },
    BandwidthSample {
        elapsed_ms: u64,
        bytes: u64,
        bitrate_estimate: u64,
    },
    SeekRangeChanged(TimeRange),
    Cues(Vec<Cue>),
    Metadata(Metadata),
}

impl EngineEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::StateChanged { .. } => "state_changed",
            EngineEvent::PlayWhenReadyCommitted => "play_when_ready_committed",
            EngineEvent::PlayerError(_) => "player_error",
            EngineEvent::VideoSizeChanged(_) => "video_size_changed",
            EngineEvent::DrawnToSurface(_) => "drawn_to_surface",
            EngineEvent::DroppedFrames { .. } => "dropped_frames",
            EngineEvent::DecoderInitialized { .. } => "decoder_initialized",
            EngineEvent::DecoderInitializationError(_) => "decoder_initialization_error",
            EngineEvent::CryptoError(_) => "crypto_error",
            EngineEvent::AudioTrackInitializationError(_) => "audio_track_initialization_error",
            EngineEvent::AudioTrackWriteError(_) => "audio_track_write_error",
            EngineEvent::DrmSessionManagerError(_) => "drm_session_manager_error",
            EngineEvent::LoadStarted(_) => "load_started",
            EngineEvent::LoadCompleted(_) => "load_completed",
            EngineEvent::LoadCanceled { .. } => "load_canceled",
            EngineEvent::LoadError { .. } => "load_error",
            EngineEvent::UpstreamDiscarded { .. } => "upstream_discarded",
            EngineEvent::DownstreamFormatChanged { .. } => "downstream_format_changed",
            EngineEvent::BandwidthSample { .. } => "bandwidth_sample",
            EngineEvent::SeekRangeChanged(_) => "seek_range_changed",
            EngineEvent::Cues(_) => "cues",
            EngineEvent::Metadata(_) => "metadata",
        }
    }
}
