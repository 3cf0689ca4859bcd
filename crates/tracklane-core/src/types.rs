//! Core types for Tracklane

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Elementary stream types, one renderer each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Video,
    Audio,
    Text,
    Metadata,
}

impl TrackType {
    /// Number of track types, and therefore renderers handed to the engine
    pub const COUNT: usize = 4;

    /// All track types in renderer index order
    pub const ALL: [TrackType; TrackType::COUNT] =
        [TrackType::Video, TrackType::Audio, TrackType::Text, TrackType::Metadata];

    /// Renderer index of this type
    pub fn index(self) -> usize {
        match self {
            TrackType::Video => 0,
            TrackType::Audio => 1,
            TrackType::Text => 2,
            TrackType::Metadata => 3,
        }
    }

    /// Inverse of [`TrackType::index`]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackType::Video => write!(f, "video"),
            TrackType::Audio => write!(f, "audio"),
            TrackType::Text => write!(f, "text"),
            TrackType::Metadata => write!(f, "metadata"),
        }
    }
}

impl std::str::FromStr for TrackType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" => Ok(TrackType::Video),
            "audio" => Ok(TrackType::Audio),
            "text" | "captions" | "subtitles" => Ok(TrackType::Text),
            "metadata" | "id3" => Ok(TrackType::Metadata),
            other => Err(crate::Error::InvalidConfig(format!("unknown track type '{}'", other))),
        }
    }
}

/// Fixed-size table with one entry per [`TrackType`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerTrack<T>([T; TrackType::COUNT]);

impl<T> PerTrack<T> {
    /// Build a table by evaluating `f` for every track type
    pub fn from_fn(mut f: impl FnMut(TrackType) -> T) -> Self {
        Self(TrackType::ALL.map(&mut f))
    }

    /// Iterate entries together with their track type
    pub fn iter(&self) -> impl Iterator<Item = (TrackType, &T)> {
        TrackType::ALL.into_iter().zip(self.0.iter())
    }

    /// Transform every entry, keeping the table shape
    pub fn map<U>(self, mut f: impl FnMut(TrackType, T) -> U) -> PerTrack<U> {
        let [video, audio, text, metadata] = self.0;
        PerTrack([
            f(TrackType::Video, video),
            f(TrackType::Audio, audio),
            f(TrackType::Text, text),
            f(TrackType::Metadata, metadata),
        ])
    }

    pub fn into_inner(self) -> [T; TrackType::COUNT] {
        self.0
    }
}

impl<T: Default> Default for PerTrack<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<TrackType> for PerTrack<T> {
    type Output = T;

    fn index(&self, track: TrackType) -> &T {
        &self.0[track.index()]
    }
}

impl<T> IndexMut<TrackType> for PerTrack<T> {
    fn index_mut(&mut self, track: TrackType) -> &mut T {
        &mut self.0[track.index()]
    }
}

/// Selected track within one track type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSelection {
    /// The track type is turned off
    Disabled,
    /// Index into the type's track list
    Track(usize),
}

impl TrackSelection {
    /// Default selection for every type except text
    pub const PRIMARY: TrackSelection = TrackSelection::Track(0);

    pub fn is_enabled(self) -> bool {
        !matches!(self, TrackSelection::Disabled)
    }

    pub fn index(self) -> Option<usize> {
        match self {
            TrackSelection::Disabled => None,
            TrackSelection::Track(index) => Some(index),
        }
    }
}

impl std::fmt::Display for TrackSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackSelection::Disabled => write!(f, "disabled"),
            TrackSelection::Track(index) => write!(f, "#{}", index),
        }
    }
}

/// Progress of the renderer builder for the current session lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    /// No build requested, or the last one failed
    Idle,
    /// A build is outstanding
    Building,
    /// Renderers were handed to the engine
    Built,
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildState::Idle => write!(f, "idle"),
            BuildState::Building => write!(f, "building"),
            BuildState::Built => write!(f, "built"),
        }
    }
}

/// Playback states shared by the engine and the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Neither prepared nor being prepared
    Idle,
    /// Being prepared
    Preparing,
    /// Prepared but more data must be buffered before playback can proceed
    Buffering,
    /// Able to play immediately from the current position
    Ready,
    /// Finished playing the media
    Ended,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Preparing => write!(f, "preparing"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Ready => write!(f, "ready"),
            PlaybackState::Ended => write!(f, "ended"),
        }
    }
}

/// Opaque rendering target handed to the video renderer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Surface {
    pub id: Uuid,
    pub label: String,
}

impl Surface {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
        }
    }
}

/// Reason a format was selected by a chunk source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Unspecified,
    Initial,
    Manual,
    Adaptive,
    TrickPlay,
}

/// Media format of a loaded or enabled stream
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Format {
    pub id: String,
    pub mime_type: String,
    /// Bitrate in bits per second
    pub bitrate: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f32>,
    pub audio_channels: Option<u8>,
    pub audio_sample_rate: Option<u32>,
    pub language: Option<String>,
}

impl Format {
    /// Create a video format
    pub fn video(id: impl Into<String>, mime_type: impl Into<String>, width: u32, height: u32, bitrate: u64) -> Self {
        Self {
            id: id.into(),
            mime_type: mime_type.into(),
            bitrate,
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    /// Create an audio format
    pub fn audio(id: impl Into<String>, mime_type: impl Into<String>, channels: u8, sample_rate: u32, bitrate: u64) -> Self {
        Self {
            id: id.into(),
            mime_type: mime_type.into(),
            bitrate,
            audio_channels: Some(channels),
            audio_sample_rate: Some(sample_rate),
            ..Default::default()
        }
    }
}

/// Video dimensions reported by the video renderer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
    pub pixel_aspect_ratio: f32,
}

/// Text alignment for cues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueAlignment {
    Start,
    Center,
    End,
}

/// A timed caption or subtitle unit ready for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub text: String,
    /// Line position as a fraction of the viewport, if positioned
    pub line: Option<f32>,
    /// Horizontal position as a fraction of the viewport, if positioned
    pub position: Option<f32>,
    pub size: Option<f32>,
    pub alignment: Option<CueAlignment>,
}

impl Cue {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            line: None,
            position: None,
            size: None,
            alignment: None,
        }
    }
}

/// Stream metadata (ID3 frames keyed by frame id)
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Seekable window of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: u64,
    pub end_ms: u64,
    /// True for live windows that move over time
    pub dynamic: bool,
}

impl TimeRange {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Kind of data a chunk load carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadDataType {
    Unknown,
    Media,
    MediaInitialization,
    Drm,
    Manifest,
}

/// A chunk load that has started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadStart {
    pub source_id: u32,
    /// Expected length in bytes, if known
    pub length: Option<u64>,
    pub data_type: LoadDataType,
    pub trigger: Trigger,
    pub format: Option<Format>,
    pub media_start_ms: u64,
    pub media_end_ms: u64,
}

/// A chunk load that has completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadCompletion {
    pub source_id: u32,
    pub bytes_loaded: u64,
    pub data_type: LoadDataType,
    pub trigger: Trigger,
    pub format: Option<Format>,
    pub media_start_ms: u64,
    pub media_end_ms: u64,
    pub elapsed_realtime_ms: u64,
    pub load_duration_ms: u64,
}

/// Decoder event counts shared between a renderer and the session
#[derive(Debug, Default)]
pub struct CodecCounters {
    pub decoder_init_count: AtomicU64,
    pub decoder_release_count: AtomicU64,
    pub rendered_output_buffer_count: AtomicU64,
    pub skipped_output_buffer_count: AtomicU64,
    pub dropped_output_buffer_count: AtomicU64,
}

impl CodecCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rendered(&self) {
        self.rendered_output_buffer_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.dropped_output_buffer_count.fetch_add(count, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> CodecCountersSnapshot {
        CodecCountersSnapshot {
            decoder_init_count: self.decoder_init_count.load(Ordering::Relaxed),
            decoder_release_count: self.decoder_release_count.load(Ordering::Relaxed),
            rendered_output_buffer_count: self.rendered_output_buffer_count.load(Ordering::Relaxed),
            skipped_output_buffer_count: self.skipped_output_buffer_count.load(Ordering::Relaxed),
            dropped_output_buffer_count: self.dropped_output_buffer_count.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`CodecCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCountersSnapshot {
    pub decoder_init_count: u64,
    pub decoder_release_count: u64,
    pub rendered_output_buffer_count: u64,
    pub skipped_output_buffer_count: u64,
    pub dropped_output_buffer_count: u64,
}

impl CodecCountersSnapshot {
    /// Fraction of output buffers dropped, 0.0 when nothing was rendered yet
    pub fn drop_ratio(&self) -> f64 {
        let total = self.rendered_output_buffer_count
            + self.skipped_output_buffer_count
            + self.dropped_output_buffer_count;
        if total == 0 {
            return 0.0;
        }
        self.dropped_output_buffer_count as f64 / total as f64
    }
}
