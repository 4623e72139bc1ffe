//! The persisted tunnel record and the runtime state derived from it.

use std::time::{SystemTime, UNIX_EPOCH};

use config::labels::Labels;
use config::mask::{masked_secret, masked_token};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tunnel's durable identity, metadata, and rendezvous credentials.
///
/// Persisted one-file-per-tunnel by [`crate::store::Store`]; the
/// in-memory copy held by a [`crate::controller::Controller`] is this
/// same type, never a parallel "runtime" struct, so there is exactly
/// one place that knows how to (de)serialize it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunnel {
    /// Stable identifier, generated at creation and never reused.
    pub identifier: String,
    /// Human-assigned, mutable display name.
    pub name: String,
    /// Mutable string-to-string labels, validated against the label
    /// grammar in [`config::labels`].
    pub labels: Labels,
    /// Unix timestamp (seconds) this tunnel was created.
    pub creation_time: u64,
    /// Peer-connection configuration.
    pub configuration: TunnelConfiguration,
    /// Opaque credential presented to the rendezvous service.
    pub token: String,
    /// HMAC secret used to sign and verify offers (32 bytes for the v1
    /// scheme, see `tunnel::signature::SECRET_LEN_V1`).
    pub secret: Vec<u8>,
}

/// The subset of a tunnel's configuration the peer-connection factory
/// needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfiguration {
    /// ICE servers used to negotiate the peer connection.
    pub ice_servers: Vec<String>,
}

/// Returned once by [`crate::manager::Manager::create`]; identical to
/// the persisted [`Tunnel`], including its unmasked token and secret.
/// Every later observation of this tunnel (via `List`) goes through
/// [`Tunnel::masked`] instead, so this is the only point in the
/// registry's lifetime the raw credentials are handed back out.
pub type TunnelHostCredentials = Tunnel;

impl Tunnel {
    /// Builds a fresh tunnel record with a new identifier, token, and
    /// HMAC secret.
    #[must_use]
    pub fn new(name: String, labels: Labels, ice_servers: Vec<String>) -> Self {
        Self {
            identifier: Uuid::new_v4().to_string(),
            name,
            labels,
            creation_time: unix_now(),
            configuration: TunnelConfiguration { ice_servers },
            token: Uuid::new_v4().to_string(),
            secret: generate_secret(),
        }
    }

    /// Returns a copy with `token` and `secret` redacted, safe to
    /// surface through `List` or logs.
    #[must_use]
    pub fn masked(&self) -> Self {
        Self {
            token: masked_token(&self.token),
            secret: masked_secret(&self.secret),
            ..self.clone()
        }
    }
}

fn generate_secret() -> Vec<u8> {
    let mut secret = Vec::with_capacity(tunnel::signature::SECRET_LEN_V1);
    while secret.len() < tunnel::signature::SECRET_LEN_V1 {
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
    }
    secret.truncate(tunnel::signature::SECRET_LEN_V1);
    secret
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/// A tunnel's live connectivity status, the Rust realization of the
/// three-state status in the data model (disconnected/connecting/
/// connected collapse every lower-level peer-connection state, see
/// `tunnel::session::PeerConnectionState`, into these three).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No active connection attempt.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The tunnel has a usable peer connection.
    Connected,
}

/// A tunnel plus the live state its controller tracks: connectivity,
/// session counters, and the most recent error.
#[derive(Debug, Clone)]
pub struct TunnelState {
    /// The persisted tunnel record.
    pub tunnel: Tunnel,
    /// Current connectivity status.
    pub status: Status,
    /// Number of dial requests currently being serviced.
    pub active_sessions: u64,
    /// Lifetime count of dial requests serviced (successfully or not).
    pub total_sessions: u64,
    /// The most recent error the controller observed, if any.
    pub last_error: Option<String>,
}

impl TunnelState {
    /// Returns a copy with the embedded tunnel's sensitive fields
    /// redacted, per [`Tunnel::masked`].
    #[must_use]
    pub fn masked(&self) -> Self {
        Self {
            tunnel: self.tunnel.masked(),
            ..self.clone()
        }
    }
}
