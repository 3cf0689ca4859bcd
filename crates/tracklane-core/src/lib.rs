//! Tracklane Core - Playback Session Library
//!
//! This crate wraps a multi-renderer playback engine in a session that owns
//! everything around it:
//! - Asynchronous, cancellable renderer builds per streaming protocol
//! - Per-type track selection over multi-track sources
//! - Video surface attachment, including a blocking detach handshake
//! - A playback state that accounts for the build phase
//! - Listener fan-out and a timestamped event stream
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Tracklane Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐        BuildRequest         ┌──────────────┐  │
//! │  │   Renderer   │ ──────────────────────────▶ │   Command    │  │
//! │  │   Builder    │      (any thread)           │    Queue     │  │
//! │  └──────────────┘                             └──────┬───────┘  │
//! │                                                      │          │
//! │  ┌──────────────┐         EventSink                  │          │
//! │  │   Playback   │ ───────────────────────────────────┤          │
//! │  │    Engine    │ ◀──────────┐                       │          │
//! │  └──────────────┘            │                ┌──────┴───────┐  │
//! │                              └─────────────── │   Playback   │  │
//! │                                 prepare /     │   Session    │  │
//! │                                 messages      └──────┬───────┘  │
//! │                                                      │          │
//! │                                               ┌──────┴───────┐  │
//! │                                               │  Listeners / │  │
//! │                                               │ EventRecorder│  │
//! │                                               └──────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod content;
pub mod engine;
pub mod queue;
pub mod builder;
pub mod listener;
pub mod session;
#[cfg(feature = "sim")]
pub mod sim;

pub use error::{Error, ErrorCategory, Result};
pub use types::*;
pub use config::SessionConfig;
pub use content::{detect_content_type, ContentType};
pub use engine::{
    BandwidthMeter, EngineEvent, EngineMessage, MessageTarget, MultiTrackSource, PlaybackEngine, Renderer,
    RendererSlot,
};
pub use queue::{BuildRequest, EventSink, SessionCommand};
pub use builder::{BuiltRenderers, BuiltTables, NormalizedBuild, RendererBuilder};
pub use listener::{
    CaptionListener, EventRecorder, InfoListener, InternalErrorListener, ListenerSet, MetadataListener,
    SessionEvent, SessionEventRecord, SessionListener,
};
pub use session::{DebugSnapshot, PlaybackSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
pub fn init() {
    tracing::info!(version = VERSION, "Tracklane Core initialized");
}
