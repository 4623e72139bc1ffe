use thiserror::Error;

/// Errors produced while establishing or hosting a tunnel session.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The peer-connection factory could not be constructed.
    #[error("failed to initialize peer connection factory: {0}")]
    FactoryInit(String),

    /// The local offer could not be created or marshalled.
    #[error("failed to create local offer: {0}")]
    OfferCreation(String),

    /// The rendezvous service rejected the exchange as unauthorized.
    #[error("rendezvous exchange unauthorized")]
    Unauthorized,

    /// The rendezvous service could not be reached or returned a
    /// transport-level failure.
    #[error("rendezvous exchange failed: {0}")]
    RendezvousTransport(#[from] reqwest::Error),

    /// The remote offer's signature did not match.
    #[error("remote offer signature mismatch")]
    SignatureMismatch,

    /// Setting the local or remote session description failed.
    #[error("failed to set session description: {0}")]
    SessionDescription(String),

    /// The underlying peer connection reported an error.
    #[error("peer connection error: {0}")]
    PeerConnection(String),

    /// The peer connection transitioned to a disconnected state.
    #[error("peer connection state: {0}")]
    PeerConnectionState(String),

    /// An incoming data channel could not be adapted or initialized.
    #[error("data channel setup failed: {0}")]
    DataChannel(#[from] transport::TransportError),

    /// The decoded `InitializeRequestV1` was invalid.
    #[error("invalid initialize request: {0}")]
    InvalidInitializeRequest(String),

    /// Framing error while exchanging the initialize handshake.
    #[error(transparent)]
    Framing(#[from] framing::FramingError),

    /// No compatible agent binary could be located.
    #[error("no agent binary for version {major}.{minor} on {platform}")]
    AgentNotFound {
        /// Requested major version.
        major: u32,
        /// Requested minor version.
        minor: u32,
        /// Platform identifier the search used.
        platform: String,
    },

    /// Launching or driving the agent subprocess failed.
    #[error("agent subprocess error: {0}")]
    Agent(#[from] std::io::Error),

    /// The operation was cancelled.
    #[error("tunnel session cancelled")]
    Cancelled,
}

/// How a [`TunnelError`] should be handled by `HostTunnel`'s caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retrying is pointless; the tunnel must be torn down.
    Unrecoverable,
    /// Retry after [`crate::session::HOST_TUNNEL_RETRY_DELAY`].
    DelayedRecoverable,
    /// Retry immediately.
    Recoverable,
}

impl TunnelError {
    /// Classifies this error per the failure-severity taxonomy.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::FactoryInit(_) | Self::Unauthorized | Self::SignatureMismatch => {
                Severity::Unrecoverable
            }
            Self::RendezvousTransport(_) => Severity::DelayedRecoverable,
            Self::OfferCreation(_)
            | Self::SessionDescription(_)
            | Self::PeerConnectionState(_)
            | Self::Cancelled => Severity::Recoverable,
            Self::PeerConnection(_)
            | Self::DataChannel(_)
            | Self::InvalidInitializeRequest(_)
            | Self::Framing(_)
            | Self::AgentNotFound { .. }
            | Self::Agent(_) => Severity::Recoverable,
        }
    }
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TunnelError>;
