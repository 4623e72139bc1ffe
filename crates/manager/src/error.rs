use thiserror::Error;

/// Errors produced by the tunnel registry and its controllers.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No tunnel matched the given identifier, name, or selection.
    #[error("tunnel not found: {0}")]
    NotFound(String),

    /// A dial-by-identifier-or-name selection matched more than one
    /// tunnel.
    #[error("tunnel identifier/name {0:?} is ambiguous: matches {1} tunnels")]
    Ambiguous(String, usize),

    /// A specification in a selection list matched no tunnel.
    #[error("selection specification {0:?} matched no tunnel")]
    SpecificationUnmatched(String),

    /// The tunnel is paused and cannot service a dial.
    #[error("tunnel {0} is paused")]
    Paused(String),

    /// The tracker was poisoned by a shutdown; no further state
    /// changes will be observed.
    #[error("manager is shutting down")]
    Poisoned,

    /// The operation was cancelled before it could complete.
    #[error("operation cancelled")]
    Cancelled,

    /// Label or selection validation failed.
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// A tunnel session error propagated from the `tunnel` crate.
    #[error(transparent)]
    Tunnel(#[from] tunnel::TunnelError),

    /// Reading or writing a persisted tunnel record failed.
    #[error("tunnel store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted tunnel record could not be decoded.
    #[error(transparent)]
    Framing(#[from] framing::FramingError),
}
