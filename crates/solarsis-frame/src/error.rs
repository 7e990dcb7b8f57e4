/// Errors that can occur while framing outbound commands or splitting replies.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A reply line exceeded the configured maximum length.
    #[error("reply line too long ({size} bytes, max {max})")]
    LineTooLong { size: usize, max: usize },

    /// The configured line delimiter is empty.
    #[error("line delimiter must not be empty")]
    EmptyDelimiter,

    /// An I/O error occurred while reading or writing the link.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed while a frame was being written.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

impl From<solarsis_transport::TransportError> for FrameError {
    fn from(err: solarsis_transport::TransportError) -> Self {
        match err {
            solarsis_transport::TransportError::Io(io) => FrameError::Io(io),
            solarsis_transport::TransportError::Closed => FrameError::ConnectionClosed,
            other => FrameError::Io(std::io::Error::other(other.to_string())),
        }
    }
}
