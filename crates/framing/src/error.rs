use thiserror::Error;

/// Errors produced while encoding or decoding framed messages.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The message (to encode) or the announced length prefix (to
    /// decode) exceeds the configured maximum frame size.
    #[error("message of {announced} bytes exceeds the maximum frame size of {max} bytes")]
    MessageTooLarge {
        /// Size that was rejected. `u32::MAX` is used as a sentinel
        /// when the announced varint itself overflows a `u32`.
        announced: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Fewer bytes were written than the payload required.
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes the payload required.
        expected: usize,
    },

    /// The stream ended before a length prefix or payload completed.
    #[error("unexpected end of stream mid-frame")]
    UnexpectedEof,

    /// An I/O error occurred reading from or writing to the transport.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// The payload failed to deserialize into the target type.
    #[error("failed to deserialize message: {0}")]
    Deserialize(#[source] bincode::Error),
}

impl From<std::io::Error> for FramingError {
    fn from(value: std::io::Error) -> Self {
        if value.kind() == std::io::ErrorKind::UnexpectedEof {
            FramingError::UnexpectedEof
        } else {
            FramingError::Io(value)
        }
    }
}
