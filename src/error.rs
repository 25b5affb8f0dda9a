//! Centralized error types for mimeshell.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mimeshell library.
///
/// Decoding-level anomalies (bad encoded-words, unknown charsets, malformed
/// addresses) never surface here; they are recovered where they occur.
#[derive(Error, Debug)]
pub enum MimeError {
    /// The parser was used without a source, or a second source was set.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The input cannot be interpreted as RFC 822 headers at all.
    #[error("Parse failure at offset {offset}: {reason}")]
    ParseFailure { offset: usize, reason: String },

    /// An attachment target already exists under the `DuplicateThrow` strategy.
    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified message file does not exist.
    #[error("Message file not found: {0}")]
    FileNotFound(PathBuf),

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for `Result<T, MimeError>`.
pub type Result<T> = std::result::Result<T, MimeError>;

impl MimeError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `ParseFailure` at the given byte offset.
    pub fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Self::ParseFailure {
            offset,
            reason: reason.into(),
        }
    }
}

/// Allow `?` on `std::io::Error` when no path is available (stream sources).
impl From<std::io::Error> for MimeError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<stream>"),
            source,
        }
    }
}
