//! Error types for send stream decoding.
//!
//! Every variant is fatal to the decode that raised it. No partial change
//! list is ever returned alongside an error.

use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiffError {
    /// Bad magic or unsupported stream version.
    #[error("Invalid send stream header: {0}")]
    Header(String),

    /// The byte source failed or ended before the required bytes arrived.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attribute tag mismatch, malformed payload, or framing desync.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Per-path operation order outside the shapes a send stream can produce.
    #[error("Unexpected change sequence for {path}: {reason}")]
    Sequence { path: String, reason: String },
}

impl DiffError {
    pub(crate) fn sequence(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        DiffError::Sequence {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    /// Short-read helper for places that count bytes themselves.
    pub(crate) fn unexpected_eof(what: &str, expected: u64, got: u64) -> Self {
        DiffError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{}: expected {} bytes, got {}", what, expected, got),
        ))
    }
}

pub type Result<T> = std::result::Result<T, DiffError>;
