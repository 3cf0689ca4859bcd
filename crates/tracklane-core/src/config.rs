//! Session configuration

use crate::{Error, Result, TrackSelection};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Media that must be buffered before playback starts or resumes after a seek (ms)
    ///
    /// The session does not buffer; the threshold is handed to the engine
    /// implementation, which applies it. The simulated engine only logs it.
    pub min_buffer_ms: u64,
    /// Media that must be buffered to resume after a rebuffer caused by depletion (ms)
    ///
    /// Passed through to the engine implementation like `min_buffer_ms`.
    pub min_rebuffer_ms: u64,
    /// Text selection a fresh session starts with
    pub initial_text_selection: TrackSelection,
    /// Upper bound on the blocking surface handshake with the playback thread (ms)
    pub surface_ack_timeout_ms: u64,
    /// Record session events into the event channel
    pub analytics_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_buffer_ms: 1000,
            min_rebuffer_ms: 5000,
            initial_text_selection: TrackSelection::Disabled,
            surface_ack_timeout_ms: 2000,
            analytics_enabled: true,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON configuration; absent fields take their defaults
    pub fn from_json(input: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the buffer thresholds and handshake bound
    pub fn validate(&self) -> Result<()> {
        if self.min_buffer_ms == 0 {
            return Err(Error::InvalidConfig("min_buffer_ms must be positive".into()));
        }
        if self.min_rebuffer_ms < self.min_buffer_ms {
            return Err(Error::InvalidConfig(format!(
                "min_rebuffer_ms ({}) must not be below min_buffer_ms ({})",
                self.min_rebuffer_ms, self.min_buffer_ms
            )));
        }
        if self.surface_ack_timeout_ms == 0 {
            return Err(Error::InvalidConfig("surface_ack_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn surface_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.surface_ack_timeout_ms)
    }
}
