use thiserror::Error;

/// Errors produced by the RPC layer and the prompter broker.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The peer reported a handler-side failure; `0` is the message
    /// it sent, not a local error.
    #[error("remote error: {0}")]
    RemoteError(String),

    /// A framing error occurred while encoding or decoding a call.
    #[error(transparent)]
    Framing(#[from] framing::FramingError),

    /// No prompter is registered under the given id.
    #[error("no prompter registered under id {0}")]
    PrompterNotFound(String),

    /// The prompter registered under the given id has been
    /// unregistered and its mailbox drained; it can never be acquired
    /// again.
    #[error("prompter {0} is no longer available")]
    PrompterUnavailable(String),

    /// The calling context was cancelled before the operation
    /// completed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RpcError>;
