use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;

use crate::codec::{FrameConfig, LineCodec};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Reads complete reply lines from any `AsyncRead` stream.
///
/// Handles partial reads internally; callers always get whole lines.
/// [`read_line`](Self::read_line) is cancel-safe: bytes already read stay
/// buffered, so it can be used as a `tokio::select!` branch.
pub struct LineReader<T> {
    inner: T,
    buf: BytesMut,
    codec: LineCodec,
}

impl<T: AsyncRead + Unpin> LineReader<T> {
    /// Create a line reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            codec: LineCodec::default(),
        }
    }

    /// Create a line reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Result<Self> {
        Ok(Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            codec: LineCodec::new(config)?,
        })
    }

    /// Read the next complete line, without its delimiter.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub async fn read_line(&mut self) -> Result<Bytes> {
        loop {
            if let Some(line) = self.codec.decode(&mut self.buf)? {
                return Ok(line);
            }

            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                return match self.codec.decode_eof(&mut self.buf)? {
                    Some(line) => Ok(line),
                    None => Err(FrameError::ConnectionClosed),
                };
            }
        }
    }

    /// Bytes received but not yet returned as a line.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
