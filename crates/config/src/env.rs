//! Environment variables consumed by the remote-transport core:
//! `MUTAGEN_TUNNEL_UDP_PORT_MINIMUM`/`_MAXIMUM` and
//! `MUTAGEN_TUNNEL_AGENTS`.

use std::env;
use std::path::PathBuf;

use crate::{ConfigError, Result};

/// Lowest UDP port the tunnel's peer-to-peer transport may bind, when
/// neither environment variable is set.
pub const DEFAULT_UDP_PORT_MINIMUM: u16 = 62800;

/// Highest UDP port the tunnel's peer-to-peer transport may bind, when
/// neither environment variable is set.
pub const DEFAULT_UDP_PORT_MAXIMUM: u16 = 62900;

/// Floor enforced on `MUTAGEN_TUNNEL_UDP_PORT_MINIMUM`.
pub const MINIMUM_PORT_FLOOR: u16 = 49152;

const ENV_UDP_MIN: &str = "MUTAGEN_TUNNEL_UDP_PORT_MINIMUM";
const ENV_UDP_MAX: &str = "MUTAGEN_TUNNEL_UDP_PORT_MAXIMUM";
const ENV_AGENTS: &str = "MUTAGEN_TUNNEL_AGENTS";

/// An inclusive UDP port range used by the peer-connection factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpPortRange {
    /// Lowest usable port, inclusive.
    pub minimum: u16,
    /// Highest usable port, inclusive.
    pub maximum: u16,
}

impl Default for UdpPortRange {
    fn default() -> Self {
        Self {
            minimum: DEFAULT_UDP_PORT_MINIMUM,
            maximum: DEFAULT_UDP_PORT_MAXIMUM,
        }
    }
}

/// Resolved tunnel environment: UDP port range plus an optional
/// override for the agent binary search directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEnvironment {
    /// UDP port range for the peer-to-peer data-channel transport.
    pub udp_ports: UdpPortRange,
    /// Optional override for the `libexec/mutagen/agents` search root.
    pub agents_directory: Option<PathBuf>,
}

impl TunnelEnvironment {
    /// Reads and validates the environment, applying defaults where
    /// variables are unset.
    pub fn from_env() -> Result<Self> {
        Self::from_values(
            env::var(ENV_UDP_MIN).ok(),
            env::var(ENV_UDP_MAX).ok(),
            env::var(ENV_AGENTS).ok(),
        )
    }

    /// Testable variant of [`Self::from_env`] that accepts raw string
    /// values instead of reading the process environment directly.
    pub fn from_values(
        min: Option<String>,
        max: Option<String>,
        agents: Option<String>,
    ) -> Result<Self> {
        let udp_ports = parse_port_range(min, max)?;
        let agents_directory = agents.map(PathBuf::from);
        Ok(Self {
            udp_ports,
            agents_directory,
        })
    }
}

fn parse_port_range(min: Option<String>, max: Option<String>) -> Result<UdpPortRange> {
    match (min, max) {
        (None, None) => Ok(UdpPortRange::default()),
        (Some(_), None) => Err(ConfigError::PartialPortRange(ENV_UDP_MAX)),
        (None, Some(_)) => Err(ConfigError::PartialPortRange(ENV_UDP_MIN)),
        (Some(min), Some(max)) => {
            let minimum = parse_port(ENV_UDP_MIN, &min)?;
            let maximum = parse_port(ENV_UDP_MAX, &max)?;
            if minimum < MINIMUM_PORT_FLOOR {
                return Err(ConfigError::PortBelowFloor {
                    floor: MINIMUM_PORT_FLOOR,
                    value: minimum,
                });
            }
            if maximum < minimum {
                return Err(ConfigError::PortRangeInverted {
                    min: minimum,
                    max: maximum,
                });
            }
            Ok(UdpPortRange { minimum, maximum })
        }
    }
}

fn parse_port(name: &'static str, raw: &str) -> Result<u16> {
    raw.trim()
        .parse::<u16>()
        .map_err(|source| ConfigError::InvalidPort { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let resolved = TunnelEnvironment::from_values(None, None, None).unwrap();
        assert_eq!(resolved.udp_ports.minimum, DEFAULT_UDP_PORT_MINIMUM);
        assert_eq!(resolved.udp_ports.maximum, DEFAULT_UDP_PORT_MAXIMUM);
        assert!(resolved.agents_directory.is_none());
    }

    #[test]
    fn rejects_partial_range() {
        let err = TunnelEnvironment::from_values(Some("50000".into()), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::PartialPortRange(_)));

        let err = TunnelEnvironment::from_values(None, Some("50000".into()), None).unwrap_err();
        assert!(matches!(err, ConfigError::PartialPortRange(_)));
    }

    #[test]
    fn rejects_minimum_below_floor() {
        let err =
            TunnelEnvironment::from_values(Some("1024".into()), Some("2048".into()), None)
                .unwrap_err();
        assert!(matches!(err, ConfigError::PortBelowFloor { .. }));
    }

    #[test]
    fn rejects_inverted_range() {
        let err =
            TunnelEnvironment::from_values(Some("60000".into()), Some("50000".into()), None)
                .unwrap_err();
        assert!(matches!(err, ConfigError::PortRangeInverted { .. }));
    }

    #[test]
    fn accepts_valid_range_and_agents_dir() {
        let resolved = TunnelEnvironment::from_values(
            Some("60000".into()),
            Some("60010".into()),
            Some("/opt/mutagen/agents".into()),
        )
        .unwrap();
        assert_eq!(resolved.udp_ports.minimum, 60000);
        assert_eq!(resolved.udp_ports.maximum, 60010);
        assert_eq!(
            resolved.agents_directory,
            Some(PathBuf::from("/opt/mutagen/agents"))
        );
    }
}
