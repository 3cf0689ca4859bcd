//! Error types for Tracklane Core

use crate::types::TrackType;
use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// How an error is propagated through the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Renderer construction failed; recoverable by preparing again
    Build,
    /// The engine hit an unrecoverable failure; the session resets to idle
    Fatal,
    /// Reported for observability only, never changes session state
    Diagnostic,
    /// Misuse of the session or bad configuration
    Usage,
}

/// Session error types
#[derive(Error, Debug)]
pub enum Error {
    // Build errors
    #[error("Renderer build failed: {0}")]
    RendererBuild(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    // Fatal playback errors
    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Renderer for {track} failed: {message}")]
    RendererFailed { track: TrackType, message: String },

    // Diagnostic errors
    #[error("Audio track initialization failed: {0}")]
    AudioTrackInit(String),

    #[error("Audio track write failed: {0}")]
    AudioTrackWrite(String),

    #[error("Decoder initialization failed for {mime_type}: {message}")]
    DecoderInit { mime_type: String, message: String },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Load error on source {source_id}: {message}")]
    Load { source_id: u32, message: String },

    #[error("DRM session error: {0}")]
    DrmSession(String),

    // Engine plumbing
    #[error("Playback thread did not acknowledge within {timeout_ms}ms")]
    AcknowledgeTimeout { timeout_ms: u64 },

    #[error("Playback thread has shut down")]
    EngineShutdown,

    // Lifecycle errors
    #[error("Session has been released")]
    Released,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Create a renderer build error
    pub fn build(msg: impl Into<String>) -> Self {
        Error::RendererBuild(msg.into())
    }

    /// Create a fatal playback error
    pub fn playback(msg: impl Into<String>) -> Self {
        Error::Playback(msg.into())
    }

    /// Classify the error by how the session propagates it
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::RendererBuild(_) | Error::UnsupportedContent(_) => ErrorCategory::Build,
            Error::Playback(_)
            | Error::RendererFailed { .. }
            | Error::AcknowledgeTimeout { .. }
            | Error::EngineShutdown => ErrorCategory::Fatal,
            Error::AudioTrackInit(_)
            | Error::AudioTrackWrite(_)
            | Error::DecoderInit { .. }
            | Error::Crypto(_)
            | Error::Load { .. }
            | Error::DrmSession(_) => ErrorCategory::Diagnostic,
            Error::Released | Error::InvalidConfig(_) | Error::Json(_) | Error::Url(_) => {
                ErrorCategory::Usage
            }
        }
    }

    /// Returns true if the error ends the current playback session
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Build | ErrorCategory::Fatal)
    }

    /// Returns the error code for event records
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::RendererBuild(_) => "RENDERER_BUILD",
            Error::UnsupportedContent(_) => "UNSUPPORTED_CONTENT",
            Error::Playback(_) => "PLAYBACK",
            Error::RendererFailed { .. } => "RENDERER_FAILED",
            Error::AudioTrackInit(_) => "AUDIO_TRACK_INIT",
            Error::AudioTrackWrite(_) => "AUDIO_TRACK_WRITE",
            Error::DecoderInit { .. } => "DECODER_INIT",
            Error::Crypto(_) => "CRYPTO",
            Error::Load { .. } => "LOAD",
            Error::DrmSession(_) => "DRM_SESSION",
            Error::AcknowledgeTimeout { .. } => "ACK_TIMEOUT",
            Error::EngineShutdown => "ENGINE_SHUTDOWN",
            Error::Released => "RELEASED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Url(_) => "URL",
        }
    }
}
