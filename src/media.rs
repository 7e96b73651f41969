//! Records that flow through the resolve→materialize pipeline.
//!
//! None of these are persisted. A [`MediaDescriptor`] is built fresh for every
//! preview request, a [`ProcessRequest`] comes straight from the web form, and
//! an [`OutputArtifact`] lives on disk only until the janitor removes it.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::timecode::{TrimWindow, format_duration};

/// Resolutions offered when no source reported the real ones.
pub const PLACEHOLDER_HEIGHTS: [u32; 4] = [360, 480, 720, 1080];
/// Duration label shown when the duration is unknown.
pub const PLACEHOLDER_DURATION: &str = "HD Available";
/// Resolution ceiling used when the form did not send a usable one.
pub const DEFAULT_QUALITY: u32 = 720;

/// Resolved metadata about a remote video.
///
/// Field names on the wire match what the web form reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaDescriptor {
    pub id: String,
    pub title: String,
    #[serde(rename = "thumbnail")]
    pub thumbnail_url: String,
    #[serde(rename = "duration")]
    pub duration_seconds: u64,
    #[serde(rename = "duration_str")]
    pub duration_display: String,
    #[serde(rename = "avail_heights")]
    pub available_heights: Vec<u32>,
}

impl MediaDescriptor {
    /// Describes a video whose duration is known.
    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self.duration_display = format_duration(seconds);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Trim,
    Audio,
    Full,
}

impl Mode {
    /// Unknown or missing values degrade to [`Mode::Trim`].
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("audio") => Mode::Audio,
            Some("full") => Mode::Full,
            _ => Mode::Trim,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Trim => "trim",
            Mode::Audio => "audio",
            Mode::Full => "full",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    pub source_url: String,
    pub mode: Mode,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub quality_height: u32,
}

impl ProcessRequest {
    pub fn new(source_url: impl Into<String>, mode: Mode) -> Self {
        Self {
            source_url: source_url.into(),
            mode,
            start_time: None,
            end_time: None,
            quality_height: DEFAULT_QUALITY,
        }
    }

    pub fn with_span(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.start_time = start.map(String::from);
        self.end_time = end.map(String::from);
        self
    }

    pub fn with_quality(mut self, height: u32) -> Self {
        self.quality_height = height;
        self
    }

    /// Parses a quality form value, falling back to [`DEFAULT_QUALITY`].
    pub fn parse_quality(value: Option<&str>) -> u32 {
        value
            .and_then(|v| v.trim().trim_end_matches('p').parse::<u32>().ok())
            .filter(|height| *height > 0)
            .unwrap_or(DEFAULT_QUALITY)
    }

    /// The span to cut, if any. `full` mode always keeps the whole video.
    pub fn trim_window(&self) -> Option<TrimWindow> {
        match self.mode {
            Mode::Full => None,
            Mode::Trim | Mode::Audio => {
                TrimWindow::between(self.start_time.as_deref(), self.end_time.as_deref())
            }
        }
    }
}

/// A generated media file. The path is absolute and existed when the
/// materializer returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    path: PathBuf,
}

impl OutputArtifact {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}
