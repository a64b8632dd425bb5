//! Supported video containers.
//!
//! The upload layer is expected to reject anything else before a file ever
//! reaches the engine; this list is the shared source of truth for it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Video container accepted for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VideoContainer {
    Mp4,
    Avi,
    Wmv,
    Mov,
    Mkv,
    Flv,
    Webm,
    #[serde(rename = "3gp")]
    ThreeGp,
    Ogg,
    Mpeg,
}

impl VideoContainer {
    pub const ALL: &'static [VideoContainer] = &[
        VideoContainer::Mp4,
        VideoContainer::Avi,
        VideoContainer::Wmv,
        VideoContainer::Mov,
        VideoContainer::Mkv,
        VideoContainer::Flv,
        VideoContainer::Webm,
        VideoContainer::ThreeGp,
        VideoContainer::Ogg,
        VideoContainer::Mpeg,
    ];

    /// Match a file extension (without the dot, case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp4" | "m4v" => Some(VideoContainer::Mp4),
            "avi" => Some(VideoContainer::Avi),
            "wmv" => Some(VideoContainer::Wmv),
            "mov" | "qt" => Some(VideoContainer::Mov),
            "mkv" => Some(VideoContainer::Mkv),
            "flv" => Some(VideoContainer::Flv),
            "webm" => Some(VideoContainer::Webm),
            "3gp" => Some(VideoContainer::ThreeGp),
            "ogg" | "ogv" => Some(VideoContainer::Ogg),
            "mpeg" | "mpg" => Some(VideoContainer::Mpeg),
            _ => None,
        }
    }

    /// Match the extension of a path.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// MIME type reported for this container.
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoContainer::Mp4 => "video/mp4",
            VideoContainer::Avi => "video/x-msvideo",
            VideoContainer::Wmv => "video/x-ms-wmv",
            VideoContainer::Mov => "video/quicktime",
            VideoContainer::Mkv => "video/x-matroska",
            VideoContainer::Flv => "video/x-flv",
            VideoContainer::Webm => "video/webm",
            VideoContainer::ThreeGp => "video/3gpp",
            VideoContainer::Ogg => "video/ogg",
            VideoContainer::Mpeg => "video/mpeg",
        }
    }

    /// Match a MIME type (case-insensitive).
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.mime_type().eq_ignore_ascii_case(mime.trim()))
    }
}
