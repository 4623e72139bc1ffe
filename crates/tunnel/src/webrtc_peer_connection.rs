//! [`crate::session::PeerConnectionFactory`] implementation backed by
//! the `webrtc` crate's ICE/DTLS/SCTP stack.
//!
//! Mirrors [`transport::webrtc_data_channel::PeerDataChannel`]: the
//! generic session logic in [`crate::session`] never names a `webrtc`
//! type directly, so it stays exercisable with the fakes in that
//! module's test suite.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use transport::webrtc_data_channel::PeerDataChannel;

use crate::error::{Result, TunnelError};
use crate::session::{
    OnDataChannelHandler, OnStateChangeHandler, PeerConnection, PeerConnectionFactory,
    PeerConnectionState,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Builds [`WebrtcPeerConnection`]s sharing one `webrtc` `API`
/// instance (media engine plus interceptor registry), matching the
/// crate's recommended one-`API`-per-process setup.
///
/// Constructed once in an `Init` step and handed to every concurrent
/// `host_tunnel` call, rather than built freshly per tunnel.
pub struct WebrtcPeerConnectionFactory {
    api: API,
}

impl WebrtcPeerConnectionFactory {
    /// Builds the shared `webrtc` API with default codecs and
    /// interceptors registered.
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|err| TunnelError::FactoryInit(err.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|err| TunnelError::FactoryInit(err.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

impl PeerConnectionFactory for WebrtcPeerConnectionFactory {
    type Connection = WebrtcPeerConnection;

    fn new_peer_connection(&self, ice_servers: &[String]) -> BoxFuture<'_, Result<Self::Connection>> {
        let urls = ice_servers.to_vec();
        Box::pin(async move {
            let config = RTCConfiguration {
                ice_servers: vec![RTCIceServer {
                    urls,
                    ..Default::default()
                }],
                ..Default::default()
            };
            let inner = self
                .api
                .new_peer_connection(config)
                .await
                .map_err(|err| TunnelError::FactoryInit(err.to_string()))?;
            Ok(WebrtcPeerConnection {
                inner: Arc::new(inner),
            })
        })
    }
}

/// Wraps `Arc<RTCPeerConnection>` so it implements
/// [`crate::session::PeerConnection`].
pub struct WebrtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
}

impl PeerConnection for WebrtcPeerConnection {
    type DataChannel = PeerDataChannel;

    fn create_offer(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let offer = self
                .inner
                .create_offer(None)
                .await
                .map_err(|err| TunnelError::OfferCreation(err.to_string()))?;
            serde_json::to_string(&offer)
                .map_err(|err| TunnelError::OfferCreation(err.to_string()))
        })
    }

    fn set_local_description(&self, description: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let description = parse_description(&description)?;
            self.inner
                .set_local_description(description)
                .await
                .map_err(|err| TunnelError::SessionDescription(err.to_string()))
        })
    }

    fn set_remote_description(&self, description: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let description = parse_description(&description)?;
            self.inner
                .set_remote_description(description)
                .await
                .map_err(|err| TunnelError::SessionDescription(err.to_string()))
        })
    }

    fn on_state_change(&self, f: OnStateChangeHandler) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.inner
                .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                    f(map_state(state))
                }))
                .await;
        })
    }

    fn on_data_channel(&self, f: OnDataChannelHandler<Self::DataChannel>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.inner
                .on_data_channel(Box::new(move |data_channel: Arc<RTCDataChannel>| {
                    f(Arc::new(PeerDataChannel::new(data_channel)))
                }))
                .await;
        })
    }

    fn create_data_channel(&self, label: &str) -> BoxFuture<'_, Result<Arc<Self::DataChannel>>> {
        let label = label.to_string();
        Box::pin(async move {
            let data_channel = self
                .inner
                .create_data_channel(&label, None)
                .await
                .map_err(|err| TunnelError::PeerConnection(err.to_string()))?;
            Ok(Arc::new(PeerDataChannel::new(data_channel)))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner
                .close()
                .await
                .map_err(|err| TunnelError::PeerConnection(err.to_string()))
        })
    }
}

fn parse_description(raw: &str) -> Result<RTCSessionDescription> {
    serde_json::from_str(raw).map_err(|err| TunnelError::SessionDescription(err.to_string()))
}

fn map_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
            PeerConnectionState::New
        }
    }
}
