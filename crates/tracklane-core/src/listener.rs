//! Listener endpoints
//!
//! One narrow trait per event category. A session holds any number of
//! [`SessionListener`]s and at most one listener of each other kind.
//! [`EventRecorder`] implements every trait and forwards timestamped records
//! into a channel, for callers that would rather consume a stream.

use crate::{
    error::Error,
    types::*,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Core session events
pub trait SessionListener: Send + Sync {
    /// Play-when-ready or the reported playback state changed
    fn on_state_changed(&self, play_when_ready: bool, state: PlaybackState);

    /// A build or playback failure ended the session
    fn on_error(&self, error: &Error);

    fn on_video_size_changed(&self, size: VideoSize);
}

/// Internal errors, for informational purposes only
///
/// These do not change session state by themselves, but an internal error the
/// engine cannot recover from is followed by [`SessionListener::on_error`].
pub trait InternalErrorListener: Send + Sync {
    fn on_renderer_initialization_error(&self, _error: &Error) {}
    fn on_audio_track_initialization_error(&self, _error: &Error) {}
    fn on_audio_track_write_error(&self, _error: &Error) {}
    fn on_decoder_initialization_error(&self, _error: &Error) {}
    fn on_crypto_error(&self, _error: &Error) {}
    fn on_load_error(&self, _source_id: u32, _error: &Error) {}
    fn on_drm_session_manager_error(&self, _error: &Error) {}
}

/// Debugging information
pub trait InfoListener: Send + Sync {
    fn on_video_format_enabled(&self, _format: &Format, _trigger: Trigger, _media_time_ms: u64) {}
    fn on_audio_format_enabled(&self, _format: &Format, _trigger: Trigger, _media_time_ms: u64) {}
    fn on_dropped_frames(&self, _count: u32, _elapsed_ms: u64) {}
    fn on_bandwidth_sample(&self, _elapsed_ms: u64, _bytes: u64, _bitrate_estimate: u64) {}
    fn on_load_started(&self, _load: &LoadStart) {}
    fn on_load_completed(&self, _load: &LoadCompletion) {}
    fn on_decoder_initialized(&self, _decoder_name: &str, _elapsed_realtime_ms: u64, _initialization_duration_ms: u64) {}
    fn on_seek_range_changed(&self, _range: TimeRange) {}
}

/// Timed text
pub trait CaptionListener: Send + Sync {
    fn on_cues(&self, cues: &[Cue]);
}

/// Metadata parsed from the media stream
pub trait MetadataListener: Send + Sync {
    fn on_metadata(&self, metadata: &Metadata);
}

/// Ordered session listeners; duplicates are kept
#[derive(Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn SessionListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    /// Remove the first registration of this exact listener
    pub fn remove(&mut self, listener: &Arc<dyn SessionListener>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        match self
            .listeners
            .iter()
            .position(|l| Arc::as_ptr(l) as *const () == target)
        {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SessionListener>> {
        self.listeners.iter()
    }
}

/// Event forwarded by [`EventRecorder`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        play_when_ready: bool,
        state: PlaybackState,
    },
    Error {
        code: String,
        message: String,
        fatal: bool,
    },
    VideoSizeChanged(VideoSize),
    InternalError {
        kind: String,
        code: String,
        message: String,
        source_id: Option<u32>,
    },
    FormatEnabled {
        track: TrackType,
        format: Format,
        trigger: Trigger,
        media_time_ms: u64,
    },
    DroppedFrames {
        count: u32,
        elapsed_ms: u64,
    },
    BandwidthSample {
        elapsed_ms: u64,
        bytes: u64,
        bitrate_estimate: u64,
    },
    LoadStarted(LoadStart),
    LoadCompleted(LoadCompletion),
    DecoderInitialized {
        decoder_name: String,
        elapsed_realtime_ms: u64,
        initialization_duration_ms: u64,
    },
    SeekRangeChanged(TimeRange),
    Cues {
        cues: Vec<Cue>,
    },
    Metadata {
        metadata: Metadata,
    },
}

impl SessionEvent {
    /// Short name for tables and logs
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged { .. } => "state_changed",
            SessionEvent::Error { .. } => "error",
            SessionEvent::VideoSizeChanged(_) => "video_size_changed",
            SessionEvent::InternalError { .. } => "internal_error",
            SessionEvent::FormatEnabled { .. } => "format_enabled",
            SessionEvent::DroppedFrames { .. } => "dropped_frames",
            SessionEvent::BandwidthSample { .. } => "bandwidth_sample",
            SessionEvent::LoadStarted(_) => "load_started",
            SessionEvent::LoadCompleted(_) => "load_completed",
            SessionEvent::DecoderInitialized { .. } => "decoder_initialized",
            SessionEvent::SeekRangeChanged(_) => "seek_range_changed",
            SessionEvent::Cues { .. } => "cues",
            SessionEvent::Metadata { .. } => "metadata",
        }
    }
}

/// Session event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEventRecord {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Listener that turns every callback into a [`SessionEventRecord`]
pub struct EventRecorder {
    session_id: SessionId,
    sequence: AtomicU64,
    tx: mpsc::UnboundedSender<SessionEventRecord>,
}

impl EventRecorder {
    /// Create a recorder and the receiving end of its channel
    pub fn channel(session_id: SessionId) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEventRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            session_id,
            sequence: AtomicU64::new(0),
            tx,
        });
        (recorder, rx)
    }

    fn record(&self, event: SessionEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        // A dropped receiver only means nobody is listening anymore
        let _ = self.tx.send(SessionEventRecord {
            session_id: self.session_id,
            timestamp: Utc::now(),
            sequence,
            event,
        });
    }

    fn internal(&self, kind: &str, source_id: Option<u32>, error: &Error) {
        self.record(SessionEvent::InternalError {
            kind: kind.to_string(),
            code: error.error_code().to_string(),
            message: error.to_string(),
            source_id,
        });
    }
}

impl SessionListener for EventRecorder {
    fn on_state_changed(&self, play_when_ready: bool, state: PlaybackState) {
        self.record(SessionEvent::StateChanged { play_when_ready, state });
    }

    fn on_error(&self, error: &Error) {
        self.record(SessionEvent::Error {
            code: error.error_code().to_string(),
            message: error.to_string(),
            fatal: error.is_fatal(),
        });
    }

    fn on_video_size_changed(&self, size: VideoSize) {
        self.record(SessionEvent::VideoSizeChanged(size));
    }
}

impl InternalErrorListener for EventRecorder {
    fn on_renderer_initialization_error(&self, error: &Error) {
        self.internal("renderer_initialization", None, error);
    }

    fn on_audio_track_initialization_error(&self, error: &Error) {
        self.internal("audio_track_initialization", None, error);
    }

    fn on_audio_track_write_error(&self, error: &Error) {
        self.internal("audio_track_write", None, error);
    }

    fn on_decoder_initialization_error(&self, error: &Error) {
        self.internal("decoder_initialization", None, error);
    }

    fn on_crypto_error(&self, error: &Error) {
        self.internal("crypto", None, error);
    }

    fn on_load_error(&self, source_id: u32, error: &Error) {
        self.internal("load", Some(source_id), error);
    }

    fn on_drm_session_manager_error(&self, error: &Error) {
        self.internal("drm_session_manager", None, error);
    }
}

impl InfoListener for EventRecorder {
    fn on_video_format_enabled(&self, format: &Format, trigger: Trigger, media_time_ms: u64) {
        self.record(SessionEvent::FormatEnabled {
            track: TrackType::Video,
            format: format.clone(),
            trigger,
            media_time_ms,
        });
    }

    fn on_audio_format_enabled(&self, format: &Format, trigger: Trigger, media_time_ms: u64) {
        self.record(SessionEvent::FormatEnabled {
            track: TrackType::Audio,
            format: format.clone(),
            trigger,
            media_time_ms,
        });
    }

    fn on_dropped_frames(&self, count: u32, elapsed_ms: u64) {
        self.record(SessionEvent::DroppedFrames { count, elapsed_ms });
    }

    fn on_bandwidth_sample(&self, elapsed_ms: u64, bytes: u64, bitrate_estimate: u64) {
        self.record(SessionEvent::BandwidthSample { elapsed_ms, bytes, bitrate_estimate });
    }

    fn on_load_started(&self, load: &LoadStart) {
        self.record(SessionEvent::LoadStarted(load.clone()));
    }

    fn on_load_completed(&self, load: &LoadCompletion) {
        self.record(SessionEvent::LoadCompleted(load.clone()));
    }

    fn on_decoder_initialized(&self, decoder_name: &str, elapsed_realtime_ms: u64, initialization_duration_ms: u64) {
        self.record(SessionEvent::DecoderInitialized {
            decoder_name: decoder_name.to_string(),
            elapsed_realtime_ms,
            initialization_duration_ms,
        });
    }

    fn on_seek_range_changed(&self, range: TimeRange) {
        self.record(SessionEvent::SeekRangeChanged(range));
    }
}

impl CaptionListener for EventRecorder {
    fn on_cues(&self, cues: &[Cue]) {
        self.record(SessionEvent::Cues { cues: cues.to_vec() });
    }
}

impl MetadataListener for EventRecorder {
    fn on_metadata(&self, metadata: &Metadata) {
        self.record(SessionEvent::Metadata { metadata: metadata.clone() });
    }
}
