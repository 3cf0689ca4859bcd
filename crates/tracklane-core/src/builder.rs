//! Renderer builders
//!
//! A [`RendererBuilder`] constructs the per-type renderers for one streaming
//! protocol. Building is asynchronous: the builder receives a
//! [`BuildRequest`](crate::queue::BuildRequest) and reports back through it
//! exactly once, from any thread.

use crate::{
    engine::{BandwidthMeter, MultiTrackSource, Renderer, RendererSlot},
    queue::BuildRequest,
    types::*,
};
use std::fmt;
use std::sync::Arc;

/// Builds renderers for a playback session
pub trait RendererBuilder: Send {
    /// Start building; the outcome is reported through `request`
    fn build_renderers(&mut self, request: BuildRequest);

    /// Cancel the current build, if there is one
    ///
    /// A cancelled build must not report through its request. Calling this
    /// with nothing in flight does nothing.
    fn cancel(&mut self);
}

/// Raw builder output; any part may be missing
#[derive(Default)]
pub struct BuiltRenderers {
    /// Track names per type, `None` where unknown
    pub track_names: Option<PerTrack<Option<Vec<String>>>>,
    /// Sources able to switch tracks, `None` for types with a single track
    pub sources: Option<PerTrack<Option<Arc<dyn MultiTrackSource>>>>,
    /// Renderers per type, `None` where the content has no such media
    pub renderers: PerTrack<Option<Box<dyn Renderer>>>,
    pub bandwidth_meter: Option<Arc<dyn BandwidthMeter>>,
}

impl fmt::Debug for BuiltRenderers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let renderers: Vec<_> = self
            .renderers
            .iter()
            .map(|(track, r)| (track, r.as_ref().map(|r| r.name().to_string())))
            .collect();
        f.debug_struct("BuiltRenderers")
            .field("track_names", &self.track_names)
            .field("sources", &self.sources)
            .field("renderers", &renderers)
            .field("bandwidth_meter", &self.bandwidth_meter.is_some())
            .finish()
    }
}

impl BuiltRenderers {
    /// Output with every part absent
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renderer(mut self, track: TrackType, renderer: Box<dyn Renderer>) -> Self {
        self.renderers[track] = Some(renderer);
        self
    }

    pub fn with_track_names<S: Into<String>>(
        mut self,
        track: TrackType,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        let table = self.track_names.get_or_insert_with(PerTrack::default);
        table[track] = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_source(mut self, track: TrackType, source: Arc<dyn MultiTrackSource>) -> Self {
        let table = self.sources.get_or_insert_with(PerTrack::default);
        table[track] = Some(source);
        self
    }

    pub fn with_bandwidth_meter(mut self, meter: Arc<dyn BandwidthMeter>) -> Self {
        self.bandwidth_meter = Some(meter);
        self
    }

    /// Fill every gap so the engine always receives a full renderer array
    ///
    /// A missing name row becomes a row of unknown names sized to the type's
    /// source track count, or a single entry when the type has no source. A
    /// missing renderer becomes [`RendererSlot::Absent`].
    pub fn normalize(self) -> NormalizedBuild {
        let sources = self.sources.unwrap_or_default();
        let mut names = self.track_names.unwrap_or_default();

        let track_names = PerTrack::from_fn(|track| match names[track].take() {
            Some(row) => row.into_iter().map(Some).collect(),
            None => {
                let count = sources[track].as_ref().map_or(1, |s| s.track_count());
                vec![None; count]
            }
        });

        NormalizedBuild {
            tables: BuiltTables { track_names, sources },
            renderers: self.renderers.map(|_, renderer| RendererSlot::from(renderer)),
            bandwidth_meter: self.bandwidth_meter,
        }
    }
}

/// Track tables published together after a successful build
#[derive(Debug, Clone)]
pub struct BuiltTables {
    pub track_names: PerTrack<Vec<Option<String>>>,
    pub sources: PerTrack<Option<Arc<dyn MultiTrackSource>>>,
}

/// Builder output with every gap filled
#[derive(Debug)]
pub struct NormalizedBuild {
    pub tables: BuiltTables,
    pub renderers: PerTrack<RendererSlot>,
    pub bandwidth_meter: Option<Arc<dyn BandwidthMeter>>,
}
