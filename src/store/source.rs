//! Message source: the raw bytes a parse session works on.
//!
//! Exactly one of a file path, a readable stream or an in-memory buffer. The
//! source is owned by the parsed message and released with it.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MimeError, Result};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Where the message bytes came from.
pub enum Source {
    /// Read from a file.
    Path { path: PathBuf, data: Vec<u8> },
    /// Drained from a stream; the handle is kept until the source is dropped.
    Stream {
        reader: Box<dyn Read>,
        data: Vec<u8>,
    },
    /// Supplied by the caller.
    Buffer(Vec<u8>),
}

impl Source {
    /// Read a message file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MimeError::FileNotFound(path.clone()),
            _ => MimeError::io(&path, e),
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| MimeError::io(&path, e))?;
        debug!(path = %path.display(), bytes = data.len(), "Loaded message file");
        Ok(Self::Path { path, data })
    }

    /// Read a message from a stream positioned at its start.
    pub fn from_reader(reader: impl Read + 'static) -> Result<Self> {
        let mut reader: Box<dyn Read> = Box::new(reader);
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        debug!(bytes = data.len(), "Loaded message stream");
        Ok(Self::Stream { reader, data })
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Buffer(data.into())
    }

    /// Raw message bytes.
    pub fn data(&self) -> &[u8] {
        match self {
            Self::Path { data, .. } | Self::Stream { data, .. } => data,
            Self::Buffer(data) => data,
        }
    }

    /// Path of a file source.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    /// Offset of the first header byte: after a UTF-8 BOM and an mbox
    /// `From ` envelope line, if present.
    pub fn message_start(&self) -> usize {
        message_start(self.data())
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { path, data } => f
                .debug_struct("Path")
                .field("path", path)
                .field("bytes", &data.len())
                .finish(),
            Self::Stream { data, .. } => f
                .debug_struct("Stream")
                .field("bytes", &data.len())
                .finish(),
            Self::Buffer(data) => f.debug_tuple("Buffer").field(&data.len()).finish(),
        }
    }
}

/// See [`Source::message_start`].
pub fn message_start(data: &[u8]) -> usize {
    let mut start = 0;
    if data.starts_with(UTF8_BOM) {
        start = UTF8_BOM.len();
    }
    if data[start..].starts_with(b"From ") {
        start = match data[start..].iter().position(|&b| b == b'\n') {
            Some(i) => start + i + 1,
            None => data.len(),
        };
    }
    start
}
