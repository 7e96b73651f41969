//! Failure taxonomy shared by the resolver and the materializer.
//!
//! Internal helpers work with `anyhow::Result`; the component boundaries turn
//! those into a [`Failure`] carrying one of four kinds and a message that is
//! safe to show to the person using the web form.

use std::fmt;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The URL is malformed or not a recognised YouTube shape.
    InvalidUrl,
    /// Metadata or stream resolution was refused or rate-limited upstream.
    SourceBlocked,
    /// ffmpeg failed or produced no file.
    ProcessingFailed,
    /// Anything else.
    UnexpectedError,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidUrl => "invalid_url",
            FailureKind::SourceBlocked => "source_blocked",
            FailureKind::ProcessingFailed => "processing_failed",
            FailureKind::UnexpectedError => "unexpected_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_url() -> Self {
        Self::new(FailureKind::InvalidUrl, "Invalid YouTube URL")
    }

    pub fn source_blocked(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SourceBlocked, message)
    }

    pub fn processing_failed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ProcessingFailed, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::UnexpectedError, message)
    }
}

/// Result type returned by the public pipeline operations.
pub type Outcome<T> = std::result::Result<T, Failure>;

/// Turns an internal `anyhow` error into a [`Failure`], logging the full
/// cause chain since only the short message reaches the caller.
pub trait FailWith<T> {
    fn fail_with(self, kind: FailureKind, message: &str) -> Outcome<T>;
}

impl<T> FailWith<T> for anyhow::Result<T> {
    fn fail_with(self, kind: FailureKind, message: &str) -> Outcome<T> {
        self.map_err(|err| {
            warn!(kind = %kind, "{message}: {err:#}");
            Failure::new(kind, message)
        })
    }
}
