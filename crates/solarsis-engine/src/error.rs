/// Errors that can occur while queueing, exchanging or parsing commands.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Schema lookup or command encoding failed.
    #[error("schema error: {0}")]
    Schema(#[from] solarsis_schema::SchemaError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] solarsis_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] solarsis_frame::FrameError),

    /// The on-demand queue is at capacity.
    #[error("command queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The command was dropped before a reply arrived (timeout or restart).
    #[error("command abandoned before a reply arrived")]
    Abandoned,

    /// A named pre-send hook is not registered.
    #[error("unknown callback '{0}'")]
    UnknownCallback(String),

    /// The session document is invalid.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Waiting for a reply timed out.
    #[error("reply timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, EngineError>;
