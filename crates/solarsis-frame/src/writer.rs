use std::io::ErrorKind;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Writes command frames to the link as discrete, flushed bursts.
pub struct ChunkWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: AsyncWrite + Unpin> ChunkWriter<T> {
    /// Create a chunk writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a chunk writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Chunk and send a complete frame.
    pub async fn send(&mut self, frame: &Frame) -> Result<usize> {
        let chunks = frame.chunks(self.config.chunk_size);
        self.send_chunks(&chunks).await
    }

    /// Send pre-chunked bursts, draining the link after each one.
    ///
    /// Returns the number of bytes written.
    pub async fn send_chunks(&mut self, chunks: &[Bytes]) -> Result<usize> {
        let mut written = 0usize;
        for chunk in chunks {
            self.inner.write_all(chunk).await.map_err(map_io)?;
            self.inner.flush().await.map_err(map_io)?;
            written += chunk.len();
        }
        Ok(written)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn map_io(err: std::io::Error) -> FrameError {
    match err.kind() {
        ErrorKind::WriteZero | ErrorKind::BrokenPipe => FrameError::ConnectionClosed,
        _ => FrameError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn each_chunk_is_flushed_separately() {
        let mut writer = ChunkWriter::new(BurstRecorder::default());
        let frame = Frame::new(&b"^S005POP02\xe2\x0b\r"[..]);

        let written = writer.send(&frame).await.unwrap();

        assert_eq!(written, frame.wire_size());
        let bursts = writer.into_inner().bursts;
        assert_eq!(bursts, vec![b"^S005POP".to_vec(), b"02\xe2\x0b\r".to_vec()]);
    }

    #[tokio::test]
    async fn respects_configured_chunk_size() {
        let cfg = FrameConfig {
            chunk_size: 3,
            ..FrameConfig::default()
        };
        let mut writer = ChunkWriter::with_config(BurstRecorder::default(), cfg);
        writer.send(&Frame::new(&b"QPIGS\r"[..])).await.unwrap();

        assert_eq!(writer.config().chunk_size, 3);
        assert_eq!(
            writer.into_inner().bursts,
            vec![b"QPI".to_vec(), b"GS\r".to_vec()]
        );
    }

    #[tokio::test]
    async fn bytes_arrive_in_order_over_duplex() {
        let (host, mut device) = tokio::io::duplex(64);
        let mut writer = ChunkWriter::new(host);

        writer.send(&Frame::new(&b"QPIWS\xb4\xda\r"[..])).await.unwrap();
        drop(writer);

        let mut received = Vec::new();
        device.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"QPIWS\xb4\xda\r");
    }

    #[tokio::test]
    async fn zero_write_reports_connection_closed() {
        let mut writer = ChunkWriter::new(ZeroWriter);
        let err = writer.send(&Frame::new(&b"QMOD\r"[..])).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn accessors_and_into_inner() {
        let mut writer = ChunkWriter::new(BurstRecorder::default());

        let _ = writer.get_ref();
        let _ = writer.get_mut();
        let _inner = writer.into_inner();
    }

    /// Records bytes between flushes as separate bursts.
    #[derive(Default)]
    struct BurstRecorder {
        pending: Vec<u8>,
        bursts: Vec<Vec<u8>>,
    }

    impl AsyncWrite for BurstRecorder {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.pending.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            let burst = std::mem::take(&mut self.pending);
            self.bursts.push(burst);
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct ZeroWriter;

    impl AsyncWrite for ZeroWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
