use std::sync::Arc;

use thiserror::Error;

/// Errors produced by the multiplexer's read pump or write side.
#[derive(Debug, Clone, Error)]
pub enum MuxError {
    /// A header named a channel outside `[0, num_channels)`. The
    /// entire multiplexer is torn down when this occurs.
    #[error("invalid channel {channel}: multiplexer configured for {num_channels} channels")]
    InvalidChannel {
        /// Channel index from the offending header.
        channel: u8,
        /// Number of channels the multiplexer was constructed with.
        num_channels: u8,
    },

    /// The underlying transport returned fewer bytes than a block's
    /// header announced before reaching EOF.
    #[error("short transfer: block announced {expected} bytes, transferred {got} before EOF")]
    ShortTransfer {
        /// Bytes the block header announced.
        expected: u32,
        /// Bytes actually transferred before the stream ended.
        got: u32,
    },

    /// An I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The multiplexer was closed explicitly via its `Closer`.
    #[error("multiplexer closed")]
    Closed,
}

impl From<std::io::Error> for MuxError {
    fn from(value: std::io::Error) -> Self {
        MuxError::Io(Arc::new(value))
    }
}

impl From<MuxError> for std::io::Error {
    fn from(value: MuxError) -> Self {
        std::io::Error::other(value)
    }
}
