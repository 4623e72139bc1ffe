#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `mutagen-core` is the remote-transport core of Mutagen: the
//! subsystems that let a local controller process open independent,
//! flow-controlled byte streams to an agent on a remote host over a
//! peer-to-peer tunnel. The implementation lives in one crate per
//! layer, kept in their own `[workspace]` members so each is testable
//! against fakes without the layers above it:
//!
//! | crate | layer |
//! |---|---|
//! | [`framing`] | length-prefixed message framing |
//! | [`mux`] | stream multiplexing |
//! | [`transport`] | data-channel adapter and heartbeat |
//! | [`rpc`] | method-dispatched RPC and the prompter broker |
//! | [`tunnel`] | offer/answer session establishment and agent dispatch |
//! | [`manager`] | tunnel registry, persistence, and change tracking |
//! | [`config`] | environment, labels, selections, masking |
//! | [`logging`] | shared `tracing` subscriber wiring |
//!
//! This crate itself is thin: it re-exports the layers above and
//! provides [`Core`], the `Init`-step composition root the design
//! notes call for — the rendezvous-capable peer-connection factory
//! and the prompter broker are logically process-wide singletons, and
//! [`Core::init`] is the one place that constructs them, rather than
//! letting them leak into hidden module-level state.
//!
//! # Errors
//!
//! [`Core::init`] returns [`CoreError`], wrapping the configuration and
//! tunnel-session failures that can occur while composing the core
//! (malformed `MUTAGEN_TUNNEL_*` environment, `webrtc` API
//! construction).

pub use config;
pub use framing;
pub use logging;
pub use manager;
pub use mux;
pub use rpc;
pub use transport;
pub use tunnel;

use std::sync::Arc;

use rpc::broker::PrompterBroker;
use tunnel::rendezvous::RendezvousClient;
use tunnel::webrtc_peer_connection::WebrtcPeerConnectionFactory;
use manager::Manager;

use thiserror::Error;

/// This process's protocol version, sent in every tunnel
/// [`tunnel::initialize::InitializeRequestV1`] so the host side can
/// select a compatible agent binary.
pub const PROTOCOL_VERSION: (u32, u32) = (1, 0);

/// Errors produced while composing the core's process-wide
/// singletons in [`Core::init`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// The `MUTAGEN_TUNNEL_*` environment was malformed.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// The `webrtc` peer-connection factory could not be constructed.
    #[error(transparent)]
    Tunnel(#[from] tunnel::TunnelError),
    /// The tunnel store could not be opened.
    #[error(transparent)]
    Manager(#[from] manager::ManagerError),
}

/// The composed, process-wide state of the remote-transport core:
/// the shared `webrtc` peer-connection factory, the rendezvous client,
/// the prompter broker, and the tunnel manager built from them.
///
/// Constructed once in [`Core::init`] and handed to every consumer
/// (an RPC server's handlers, a CLI command) rather than reconstructed
/// per call.
pub struct Core {
    /// The tunnel registry, generic over the production
    /// [`WebrtcPeerConnectionFactory`].
    pub manager: Manager<WebrtcPeerConnectionFactory>,
    /// The process-wide prompter broker.
    pub broker: Arc<PrompterBroker>,
    /// The resolved `MUTAGEN_TUNNEL_*` environment.
    pub environment: config::env::TunnelEnvironment,
}

impl Core {
    /// Builds every process-wide singleton the core needs: reads the
    /// `MUTAGEN_TUNNEL_*` environment, constructs the shared `webrtc`
    /// peer-connection factory and rendezvous client, and opens the
    /// tunnel store at `tunnels_directory`.
    ///
    /// Call this once at process startup (after [`logging::init`]) and
    /// share the returned [`Core`] rather than calling it again.
    pub async fn init(tunnels_directory: impl Into<std::path::PathBuf>, rendezvous_base_url: &str) -> Result<Self, CoreError> {
        let environment = config::env::TunnelEnvironment::from_env()?;
        let factory = Arc::new(WebrtcPeerConnectionFactory::new()?);
        let rendezvous = Arc::new(RendezvousClient::new(rendezvous_base_url));
        let broker = Arc::new(PrompterBroker::new());

        let manager = Manager::new(
            tunnels_directory,
            factory,
            rendezvous,
            Arc::clone(&broker),
            PROTOCOL_VERSION,
        )
        .await?;

        Ok(Self {
            manager,
            broker,
            environment,
        })
    }

    /// Shuts down the tunnel manager, halting every controller.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_builds_a_usable_core_over_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let core = Core::init(dir.path(), "https://rendezvous.example.com").await.unwrap();

        let (_, states) = core
            .manager
            .list(
                tokio_util::sync::CancellationToken::new(),
                &config::selection::Selection::All,
                0,
            )
            .await
            .unwrap();
        assert!(states.is_empty());

        core.shutdown().await;
    }
}
