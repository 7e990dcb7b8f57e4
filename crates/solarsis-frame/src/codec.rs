use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::{FrameError, Result};

/// Outbound burst size expected by the device.
pub const CHUNK_SIZE: usize = 8;

/// Default maximum reply line length: 4 KiB.
pub const DEFAULT_MAX_LINE: usize = 4 * 1024;

/// A complete outbound command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Create a frame from already assembled bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// The raw frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        self.bytes.len()
    }

    /// Split into bursts of at most `chunk_size` bytes.
    pub fn chunks(&self, chunk_size: usize) -> Vec<Bytes> {
        chunk_frame(&self.bytes, chunk_size)
    }

    /// Printable rendering: ASCII kept, everything else as `\xNN`.
    pub fn escaped(&self) -> String {
        self.bytes.escape_ascii().to_string()
    }
}

/// Split `frame` into consecutive bursts of at most `chunk_size` bytes.
///
/// The slices share the frame's allocation.
pub fn chunk_frame(frame: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(frame.len().div_ceil(chunk_size));
    let mut offset = 0usize;
    while offset < frame.len() {
        let end = (offset + chunk_size).min(frame.len());
        chunks.push(frame.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Decode one delimiter-terminated line from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete line yet.
/// On success, consumes the line and its delimiter; the delimiter is not
/// part of the returned bytes.
pub fn decode_line(src: &mut BytesMut, delimiter: &[u8], max_line: usize) -> Result<Option<Bytes>> {
    if delimiter.is_empty() {
        return Err(FrameError::EmptyDelimiter);
    }

    match find(src, delimiter) {
        Some(pos) if pos > max_line => Err(FrameError::LineTooLong {
            size: pos,
            max: max_line,
        }),
        Some(pos) => {
            let line = src.split_to(pos).freeze();
            src.advance(delimiter.len());
            Ok(Some(line))
        }
        None if src.len() > max_line => Err(FrameError::LineTooLong {
            size: src.len(),
            max: max_line,
        }),
        None => Ok(None), // Need more data
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Outbound burst size. Default: 8 bytes.
    pub chunk_size: usize,
    /// Reply line delimiter. Default: `\r`.
    pub delimiter: Bytes,
    /// Maximum reply line length in bytes. Default: 4 KiB.
    pub max_line_length: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            delimiter: Bytes::from_static(b"\r"),
            max_line_length: DEFAULT_MAX_LINE,
        }
    }
}

/// `tokio-util` decoder yielding reply lines.
///
/// Overlong lines are dropped up to the next delimiter instead of failing
/// the stream, so one garbled burst does not take the link down.
#[derive(Debug, Clone)]
pub struct LineCodec {
    config: FrameConfig,
    discarding: bool,
}

impl LineCodec {
    /// Create a line decoder; the delimiter must be non-empty.
    pub fn new(config: FrameConfig) -> Result<Self> {
        if config.delimiter.is_empty() {
            return Err(FrameError::EmptyDelimiter);
        }
        Ok(Self {
            config,
            discarding: false,
        })
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self {
            config: FrameConfig::default(),
            discarding: false,
        }
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            if self.discarding {
                match find(src, &self.config.delimiter) {
                    Some(pos) => {
                        src.advance(pos + self.config.delimiter.len());
                        self.discarding = false;
                    }
                    None => {
                        // Keep a possible partial delimiter at the tail.
                        let keep = self.config.delimiter.len() - 1;
                        let drop = src.len().saturating_sub(keep);
                        src.advance(drop);
                        return Ok(None);
                    }
                }
            }

            match decode_line(src, &self.config.delimiter, self.config.max_line_length) {
                Ok(line) => return Ok(line),
                Err(FrameError::LineTooLong { size, max }) => {
                    tracing::warn!(size, max, "discarding overlong reply line");
                    self.discarding = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                if !src.is_empty() {
                    tracing::debug!(bytes = src.len(), "dropping partial reply at end of stream");
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}
