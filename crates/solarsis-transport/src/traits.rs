use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// An open, bidirectional link to the device.
///
/// Closing the link is dropping the stream.
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Produces fresh link streams.
///
/// The engine calls [`LinkOpener::open`] once at start-up and once per
/// timeout-triggered restart.
pub trait LinkOpener: Send + 'static {
    /// The stream type yielded by this opener.
    type Stream: LinkStream;

    /// Open the link.
    fn open(&mut self) -> Result<Self::Stream>;

    /// Human-readable link identifier used in log events.
    fn describe(&self) -> String;
}
