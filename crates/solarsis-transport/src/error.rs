/// Errors that can occur in link transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the link.
    #[error("failed to open {link}: {message}")]
    Open { link: String, message: String },

    /// An I/O error occurred on the link stream.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link configuration is unusable.
    #[error("invalid link configuration: {0}")]
    InvalidConfig(String),

    /// The link is not open.
    #[error("link closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
