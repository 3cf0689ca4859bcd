//! Streaming protocol detection
//!
//! Renderer builders are chosen per protocol. The protocol comes from an
//! explicit hint when one is given, otherwise from the URL.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Streaming protocol of a piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Dynamic Adaptive Streaming over HTTP
    Dash,
    /// Microsoft SmoothStreaming
    SmoothStreaming,
    /// HTTP Live Streaming
    Hls,
    /// Progressive container (MP4, WebM, M4A, MPEG-TS, AAC)
    Other,
}

impl ContentType {
    /// Whether the protocol exposes multiple switchable tracks per type
    pub fn is_adaptive(self) -> bool {
        !matches!(self, ContentType::Other)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Dash => write!(f, "dash"),
            ContentType::SmoothStreaming => write!(f, "ss"),
            ContentType::Hls => write!(f, "hls"),
            ContentType::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dash" | "mpd" => Ok(ContentType::Dash),
            "ss" | "smoothstreaming" | "smooth" => Ok(ContentType::SmoothStreaming),
            "hls" | "m3u8" => Ok(ContentType::Hls),
            "other" | "mp4" | "webm" | "progressive" => Ok(ContentType::Other),
            other => Err(Error::UnsupportedContent(other.to_string())),
        }
    }
}

/// Detect content type from an optional hint and the URL
pub fn detect_content_type(url: &Url, hint: Option<&str>) -> Result<ContentType> {
    if let Some(hint) = hint {
        return hint.parse();
    }

    let path = url.path().to_lowercase();
    if path.ends_with(".mpd") {
        return Ok(ContentType::Dash);
    }
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        return Ok(ContentType::Hls);
    }
    if path.contains(".ism") {
        return Ok(ContentType::SmoothStreaming);
    }

    Ok(ContentType::Other)
}
