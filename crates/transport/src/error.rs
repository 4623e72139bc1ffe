use std::sync::Arc;

use thiserror::Error;

/// Errors produced by the data-channel adapter and the heartbeat.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The peer sent a text-framed data-channel message. The adapter
    /// only carries binary data; a text message is a protocol error.
    #[error("received text-framed data-channel message, expected binary")]
    TextDataReceived,

    /// The underlying data channel closed, either because the peer
    /// closed it or because [`crate::adapter::Connection::close`] was
    /// called.
    #[error("data channel closed")]
    DataChannelClosed,

    /// A deadline was requested on a connection that does not support
    /// them.
    #[error("deadlines are not supported on this connection")]
    Unsupported,

    /// The heartbeat's watchdog timer expired without a valid
    /// heartbeat arriving within `HEARTBEAT_TIMEOUT`.
    #[error("heartbeat timed out waiting for peer")]
    HeartbeatTimeout,

    /// A received heartbeat failed to decode, or decoded with the
    /// wrong magic value.
    #[error("invalid heartbeat: {0}")]
    InvalidHeartbeat(String),

    /// The calling context was cancelled before the operation
    /// completed.
    #[error("operation cancelled")]
    Cancelled,

    /// An error surfaced by the underlying data-channel library.
    #[error("data channel error: {0}")]
    DataChannel(String),

    /// A framing error occurred while encoding or decoding a
    /// heartbeat message.
    #[error(transparent)]
    Framing(#[from] framing::FramingError),

    /// An I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for TransportError {
    fn from(value: std::io::Error) -> Self {
        TransportError::Io(Arc::new(value))
    }
}

impl From<TransportError> for std::io::Error {
    fn from(value: TransportError) -> Self {
        std::io::Error::other(value)
    }
}
