use thiserror::Error;

/// Errors produced while parsing environment configuration or
/// validating labels and selections.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Only one of the paired UDP port bounds was set.
    #[error("{0} must be set together with its counterpart, or not at all")]
    PartialPortRange(&'static str),

    /// A port bound failed to parse as an integer.
    #[error("{name} is not a valid port number: {source}")]
    InvalidPort {
        /// Name of the offending environment variable.
        name: &'static str,
        /// Underlying parse failure.
        #[source]
        source: std::num::ParseIntError,
    },

    /// The minimum port was below the allowed floor.
    #[error("MUTAGEN_TUNNEL_UDP_PORT_MINIMUM must be >= {floor}, got {value}")]
    PortBelowFloor {
        /// Lowest allowed port.
        floor: u16,
        /// Value that was rejected.
        value: u16,
    },

    /// The maximum port was below the minimum port.
    #[error("MUTAGEN_TUNNEL_UDP_PORT_MAXIMUM ({max}) must be >= MUTAGEN_TUNNEL_UDP_PORT_MINIMUM ({min})")]
    PortRangeInverted {
        /// Configured minimum.
        min: u16,
        /// Configured maximum.
        max: u16,
    },

    /// A label key or value violated the label grammar.
    #[error("invalid label {field}: {reason}")]
    InvalidLabel {
        /// Whether the violation was in the key or the value.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A selection specification list was empty.
    #[error("selection specification list must not be empty")]
    EmptySelection,

    /// A label selector expression failed to parse.
    #[error("invalid label selector: {0}")]
    InvalidSelector(String),
}
