//! Tunnel session establishment: the offer/answer handshake against
//! the rendezvous service, peer-connection state monitoring, and
//! per-data-channel agent dispatch.
//!
//! [`PeerConnectionFactory`] and [`PeerConnection`] abstract the
//! `webrtc` crate the same way [`transport::adapter::DataChannel`]
//! abstracts a single data channel, so [`host_tunnel`] can be driven
//! by a fake in tests (see the module's test suite) without standing
//! up a real ICE/DTLS/SCTP stack.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use transport::adapter::{DataChannel, DataChannelConnection};

use crate::agent::{locate_agent, run_agent, AgentBundle};
use crate::error::{Result, TunnelError};
use crate::initialize::{InitializeRequestV1, InitializeResponseV1};
use crate::rendezvous::{ExchangeRequest, RendezvousExchange};
use crate::signature::{decode, encode, sign_offer, verify_offer_signature};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How long `HostTunnel`'s caller should wait before retrying a
/// [`crate::error::Severity::DelayedRecoverable`] failure.
pub const HOST_TUNNEL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// The subset of `RTCPeerConnectionState` the host-side establishment
/// loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    /// Freshly created; no negotiation has started.
    New,
    /// ICE/DTLS negotiation is in progress.
    Connecting,
    /// The connection is usable.
    Connected,
    /// Connectivity was lost but may recover.
    Disconnected,
    /// Negotiation failed terminally.
    Failed,
    /// The connection was closed.
    Closed,
}

impl PeerConnectionState {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Failed | Self::Closed
        )
    }
}

/// Callback invoked on every peer-connection state transition.
pub type OnStateChangeHandler =
    Box<dyn Fn(PeerConnectionState) -> BoxFuture<'static, ()> + Send + Sync + 'static>;
/// Callback invoked for every incoming data channel.
pub type OnDataChannelHandler<D> =
    Box<dyn Fn(Arc<D>) -> BoxFuture<'static, ()> + Send + Sync + 'static>;

/// A single negotiated peer connection, abstracted from the `webrtc`
/// crate's `RTCPeerConnection` so the host-side establishment loop in
/// [`host_tunnel`] is exercisable without a live ICE stack.
pub trait PeerConnection: Send + Sync + 'static {
    /// The data-channel type this connection hands to
    /// [`Self::on_data_channel`].
    type DataChannel: DataChannel;

    /// Creates a local offer and marshals it to a transport-ready
    /// string (SDP, JSON-encoded).
    fn create_offer(&self) -> BoxFuture<'_, Result<String>>;
    /// Sets the connection's local description to a previously
    /// created offer.
    fn set_local_description(&self, description: String) -> BoxFuture<'_, Result<()>>;
    /// Sets the connection's remote description to the peer's offer.
    fn set_remote_description(&self, description: String) -> BoxFuture<'_, Result<()>>;
    /// Registers the state-change callback.
    fn on_state_change(&self, f: OnStateChangeHandler) -> BoxFuture<'_, ()>;
    /// Registers the incoming-data-channel callback.
    fn on_data_channel(&self, f: OnDataChannelHandler<Self::DataChannel>) -> BoxFuture<'_, ()>;
    /// Actively opens a new data channel, for the controller side's
    /// `Dial` (the host side only ever receives channels via
    /// [`Self::on_data_channel`]).
    fn create_data_channel(&self, label: &str) -> BoxFuture<'_, Result<Arc<Self::DataChannel>>>;
    /// Closes the peer connection.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Builds [`PeerConnection`]s configured with a list of ICE servers.
///
/// Logically a process-wide singleton: construct one in an `Init` step
/// and share it, rather than constructing it freshly per tunnel.
pub trait PeerConnectionFactory: Send + Sync + 'static {
    /// The concrete [`PeerConnection`] this factory produces.
    type Connection: PeerConnection;

    /// Creates a new peer connection configured with `ice_servers`.
    fn new_peer_connection(&self, ice_servers: &[String]) -> BoxFuture<'_, Result<Self::Connection>>;
}

/// Notified as data channels are dispatched and finish, so a caller
/// tracking a tunnel's session count doesn't need to reach inside
/// [`dispatch_data_channel`] to do it.
pub trait SessionObserver: Send + Sync + 'static {
    /// A data channel passed its initialize handshake and an agent was
    /// launched for it.
    fn session_started(&self);
    /// The agent for a previously-started session exited (or never
    /// started, if the handshake failed before reaching that point).
    fn session_ended(&self);
}

/// A [`SessionObserver`] that discards every notification.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn session_started(&self) {}
    fn session_ended(&self) {}
}

struct SessionGuard(Arc<dyn SessionObserver>);

impl SessionGuard {
    fn new(observer: Arc<dyn SessionObserver>) -> Self {
        observer.session_started();
        Self(observer)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.session_ended();
    }
}

/// Parameters identifying the tunnel being established, separate from
/// the long-lived [`PeerConnectionFactory`] and [`RendezvousExchange`]
/// collaborators so those can be shared across many concurrent
/// `host_tunnel` calls.
pub struct HostConfig {
    /// Stable tunnel identifier, sent to the rendezvous service.
    pub tunnel_id: String,
    /// Opaque rendezvous credential.
    pub token: String,
    /// HMAC secret used to sign and verify offers.
    pub secret: Vec<u8>,
    /// ICE servers passed to [`PeerConnectionFactory::new_peer_connection`].
    pub ice_servers: Vec<String>,
    /// Root of the installed-agent search tree (`libexec/mutagen/agents`).
    pub agents_directory: PathBuf,
}

/// Drives one host-side tunnel establishment to completion: offer
/// creation, rendezvous exchange, signature verification, and the
/// incoming-data-channel dispatch loop.
///
/// Always returns a [`TunnelError`]; callers classify it with
/// [`TunnelError::severity`] to decide whether and when to retry.
pub async fn host_tunnel<F>(
    factory: &F,
    rendezvous: &dyn RendezvousExchange,
    config: &HostConfig,
    bundle: Arc<dyn AgentBundle>,
    observer: Arc<dyn SessionObserver>,
    cancel: CancellationToken,
) -> TunnelError
where
    F: PeerConnectionFactory,
{
    match host_tunnel_inner(factory, rendezvous, config, bundle, observer, cancel).await {
        Ok(cause) | Err(cause) => cause,
    }
}

/// `Ok` is never actually returned: both branches of [`host_tunnel`]'s
/// match carry the same terminating cause. Writing the body with `?`
/// (via this helper) reads far more naturally than threading an
/// explicit `return` through every fallible step.
async fn host_tunnel_inner<F>(
    factory: &F,
    rendezvous: &dyn RendezvousExchange,
    config: &HostConfig,
    bundle: Arc<dyn AgentBundle>,
    observer: Arc<dyn SessionObserver>,
    cancel: CancellationToken,
) -> std::result::Result<TunnelError, TunnelError>
where
    F: PeerConnectionFactory,
{
    let connection = establish(
        factory,
        rendezvous,
        &config.tunnel_id,
        &config.token,
        &config.secret,
        &config.ice_servers,
    )
    .await?;

    let (state_tx, mut state_rx) = watch::channel(PeerConnectionState::New);
    connection
        .on_state_change(Box::new(move |state| {
            let state_tx = state_tx.clone();
            Box::pin(async move {
                let _ = state_tx.send(state);
            })
        }))
        .await;

    let (dc_tx, mut dc_rx) = mpsc::unbounded_channel::<Arc<F::Connection::DataChannel>>();
    connection
        .on_data_channel(Box::new(move |data_channel| {
            let dc_tx = dc_tx.clone();
            Box::pin(async move {
                let _ = dc_tx.send(data_channel);
            })
        }))
        .await;

    let cause = loop {
        tokio::select! {
            () = cancel.cancelled() => break TunnelError::Cancelled,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    // The connection (and its callback) was dropped;
                    // treat as the connection having closed.
                    break TunnelError::PeerConnectionState("closed".to_string());
                }
                let state = *state_rx.borrow();
                if state.is_terminal() {
                    break TunnelError::PeerConnectionState(format!("{state:?}"));
                }
            }
            received = dc_rx.recv() => {
                let Some(data_channel) = received else {
                    continue;
                };
                let child_cancel = cancel.child_token();
                let bundle = Arc::clone(&bundle);
                let observer = Arc::clone(&observer);
                let agents_directory = config.agents_directory.clone();
                tokio::spawn(async move {
                    dispatch_data_channel(data_channel, bundle, observer, agents_directory, child_cancel).await;
                });
            }
        }
    };

    let _ = connection.close().await;
    Ok(cause)
}

/// Performs the offer/answer handshake shared by both [`host_tunnel`]
/// and [`crate::dial::connect_tunnel`]: create and sign a local offer,
/// exchange it with the rendezvous service, verify the peer's
/// signature, and set the remote description. Returns the negotiated
/// [`PeerConnection`], not yet known to be `Connected` (callers watch
/// [`PeerConnection::on_state_change`] for that).
pub(crate) async fn establish<F>(
    factory: &F,
    rendezvous: &dyn RendezvousExchange,
    tunnel_id: &str,
    token: &str,
    secret: &[u8],
    ice_servers: &[String],
) -> Result<F::Connection>
where
    F: PeerConnectionFactory,
{
    let connection = factory.new_peer_connection(ice_servers).await?;

    let offer = connection.create_offer().await?;
    connection.set_local_description(offer.clone()).await?;

    let signature = sign_offer(offer.as_bytes(), secret);
    let request = ExchangeRequest {
        tunnel_id: tunnel_id.to_string(),
        token: token.to_string(),
        offer_b64: encode(offer.as_bytes()),
        signature_b64: encode(&signature),
    };
    let response = rendezvous.exchange(&request).await?;

    let peer_offer = decode(&response.peer_offer_b64)?;
    let peer_signature = decode(&response.peer_signature_b64)?;
    if !verify_offer_signature(&peer_offer, secret, &peer_signature) {
        return Err(TunnelError::SignatureMismatch);
    }
    let peer_offer =
        String::from_utf8(peer_offer).map_err(|err| TunnelError::SessionDescription(err.to_string()))?;
    connection.set_remote_description(peer_offer).await?;

    Ok(connection)
}

/// Handles one incoming data channel end-to-end: adapt, initialize,
/// locate an agent binary, and splice the agent's stdio to the
/// connection.
async fn dispatch_data_channel<D>(
    data_channel: Arc<D>,
    bundle: Arc<dyn AgentBundle>,
    observer: Arc<dyn SessionObserver>,
    agents_directory: PathBuf,
    cancel: CancellationToken,
) where
    D: DataChannel,
{
    let mut connection = DataChannelConnection::new(data_channel).await;

    let request: InitializeRequestV1 = match read_message(&mut connection).await {
        Ok(Some(request)) => request,
        Ok(None) => {
            warn!("data channel closed before sending an initialize request");
            let _ = connection.close().await;
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to decode initialize request");
            let _ = connection.close().await;
            return;
        }
    };

    if let Err(err) = request.validate() {
        let _ = write_message(&connection, &InitializeResponseV1::failure(err.to_string())).await;
        let _ = connection.close().await;
        return;
    }

    let located = locate_agent(
        bundle.as_ref(),
        &agents_directory,
        request.version_major,
        request.version_minor,
    );
    let binary = match located {
        Ok(binary) => binary,
        Err(err) => {
            let _ = write_message(&connection, &InitializeResponseV1::failure(err.to_string())).await;
            let _ = connection.close().await;
            return;
        }
    };

    if let Err(err) = write_message(&connection, &InitializeResponseV1::ok()).await {
        warn!(error = %err, "failed to send initialize response");
        let _ = connection.close().await;
        return;
    }

    info!(mode = %request.mode, "launching agent for tunneled data channel");
    let _guard = SessionGuard::new(observer);
    if let Err(err) = run_agent(&binary, &request.mode, connection, cancel).await {
        warn!(error = %err, "agent session ended with an error");
    }
}

/// Decodes one framed message from `connection`, which implements
/// [`tokio::io::AsyncRead`] directly (unlike its split write half).
pub(crate) async fn read_message<D, T>(connection: &mut DataChannelConnection<D>) -> Result<Option<T>>
where
    D: DataChannel,
    T: serde::de::DeserializeOwned,
{
    let mut decoder = framing::Decoder::new();
    decoder.decode(connection).await.map_err(TunnelError::from)
}

/// Encodes and writes one framed message as a single contiguous
/// `write_all`, matching the "one varint plus one payload write"
/// invariant framing's own [`framing::Encoder`] follows — written by
/// hand here because [`DataChannelConnection`] intentionally does not
/// implement [`tokio::io::AsyncWrite`] (see its doc comment).
pub(crate) async fn write_message<D, T>(connection: &DataChannelConnection<D>, message: &T) -> Result<()>
where
    D: DataChannel,
    T: serde::Serialize,
{
    let size = bincode::serialized_size(message).map_err(framing::FramingError::Deserialize)?;
    if size > u64::from(framing::MAX_FRAME) {
        return Err(TunnelError::Framing(framing::FramingError::MessageTooLarge {
            announced: u32::try_from(size).unwrap_or(u32::MAX),
            max: framing::MAX_FRAME,
        }));
    }
    let payload = bincode::serialize(message).map_err(framing::FramingError::Deserialize)?;

    let mut length_prefix = [0u8; framing::varint::MAX_VARINT_LEN];
    let prefix_len = framing::varint::encode(payload.len() as u32, &mut length_prefix);

    let mut framed = Vec::with_capacity(prefix_len + payload.len());
    framed.extend_from_slice(&length_prefix[..prefix_len]);
    framed.extend_from_slice(&payload);

    connection.write_all(&framed).await.map_err(TunnelError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentBundle;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    struct StubBundle;
    impl AgentBundle for StubBundle {
        fn current_version(&self) -> (u32, u32) {
            (0, 0)
        }
        fn extract(&self, _destination: &Path) -> std::io::Result<()> {
            Err(std::io::Error::other("no bundle in tests"))
        }
    }

    #[derive(Default)]
    struct FakeDataChannelInner {
        on_message: Option<transport::adapter::OnMessageHandler>,
        on_open: Option<transport::adapter::OnOpenHandler>,
        sent: Vec<bytes::Bytes>,
    }

    #[derive(Default)]
    struct FakeDataChannel {
        inner: StdMutex<FakeDataChannelInner>,
    }

    impl FakeDataChannel {
        /// Invokes the registered message handler without moving it
        /// out of the slot, since (unlike open/close) a real data
        /// channel may deliver many messages over its lifetime.
        async fn emit_message(&self, data: bytes::Bytes, is_string: bool) {
            let fut = {
                let guard = self.inner.lock().unwrap();
                let Some(handler) = guard.on_message.as_ref() else {
                    return;
                };
                handler(data, is_string)
            };
            fut.await;
        }
    }

    impl transport::adapter::DataChannel for FakeDataChannel {
        fn on_open(&self, f: transport::adapter::OnOpenHandler) -> BoxFuture<'_, ()> {
            self.inner.lock().unwrap().on_open = Some(f);
            Box::pin(async {})
        }
        fn on_close(&self, _f: transport::adapter::OnCloseHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_error(&self, _f: transport::adapter::OnErrorHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_message(&self, f: transport::adapter::OnMessageHandler) -> BoxFuture<'_, ()> {
            self.inner.lock().unwrap().on_message = Some(f);
            Box::pin(async {})
        }
        fn set_buffered_amount_low_threshold(&self, _threshold: usize) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_buffered_amount_low(
            &self,
            _f: transport::adapter::OnBufferedAmountLowHandler,
        ) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn send(&self, data: bytes::Bytes) -> BoxFuture<'_, std::result::Result<usize, transport::TransportError>> {
            let len = data.len();
            self.inner.lock().unwrap().sent.push(data);
            Box::pin(async move { Ok(len) })
        }
        fn buffered_amount(&self) -> BoxFuture<'_, usize> {
            Box::pin(async { 0 })
        }
        fn close(&self) -> BoxFuture<'_, std::result::Result<(), transport::TransportError>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct StubRendezvous {
        peer_offer: Vec<u8>,
        peer_signature: Vec<u8>,
    }

    impl RendezvousExchange for StubRendezvous {
        fn exchange<'a>(
            &'a self,
            _request: &'a ExchangeRequest,
        ) -> BoxFuture<'a, Result<crate::rendezvous::ExchangeResponse>> {
            Box::pin(async move {
                Ok(crate::rendezvous::ExchangeResponse {
                    peer_offer_b64: encode(&self.peer_offer),
                    peer_signature_b64: encode(&self.peer_signature),
                })
            })
        }
    }

    struct FakePeerConnection {
        offer: String,
    }

    impl PeerConnection for FakePeerConnection {
        type DataChannel = FakeDataChannel;

        fn create_offer(&self) -> BoxFuture<'_, Result<String>> {
            let offer = self.offer.clone();
            Box::pin(async move { Ok(offer) })
        }
        fn set_local_description(&self, _description: String) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn set_remote_description(&self, _description: String) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn on_state_change(&self, _f: OnStateChangeHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_data_channel(&self, _f: OnDataChannelHandler<Self::DataChannel>) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn create_data_channel(&self, _label: &str) -> BoxFuture<'_, Result<Arc<Self::DataChannel>>> {
            Box::pin(async { Ok(Arc::new(FakeDataChannel::default())) })
        }
        fn close(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct FakeFactory {
        offer: String,
    }

    impl PeerConnectionFactory for FakeFactory {
        type Connection = FakePeerConnection;

        fn new_peer_connection(&self, _ice_servers: &[String]) -> BoxFuture<'_, Result<Self::Connection>> {
            let offer = self.offer.clone();
            Box::pin(async move { Ok(FakePeerConnection { offer }) })
        }
    }

    fn host_config() -> HostConfig {
        HostConfig {
            tunnel_id: "tunnel-1".to_string(),
            token: "token".to_string(),
            secret: b"a shared secret of decent length".to_vec(),
            ice_servers: vec!["stun:stun.example.com:3478".to_string()],
            agents_directory: PathBuf::from("/nonexistent"),
        }
    }

    #[tokio::test]
    async fn signature_mismatch_is_unrecoverable_and_opens_no_data_channel() {
        let factory = FakeFactory {
            offer: "v=0 offer".to_string(),
        };
        let rendezvous = StubRendezvous {
            peer_offer: b"v=0 peer-offer".to_vec(),
            peer_signature: b"not a valid signature".to_vec(),
        };
        let config = host_config();

        let cause = host_tunnel(
            &factory,
            &rendezvous,
            &config,
            Arc::new(StubBundle),
            Arc::new(NullObserver),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(cause, TunnelError::SignatureMismatch));
        assert_eq!(cause.severity(), crate::error::Severity::Unrecoverable);
    }

    #[tokio::test]
    async fn matching_signature_enters_the_loop_and_honors_cancellation() {
        let offer = "v=0 offer".to_string();
        let signature = sign_offer(offer.as_bytes(), &host_config().secret);
        let factory = FakeFactory { offer: offer.clone() };
        let rendezvous = StubRendezvous {
            peer_offer: offer.into_bytes(),
            peer_signature: signature,
        };
        let config = host_config();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let cause = host_tunnel(
            &factory,
            &rendezvous,
            &config,
            Arc::new(StubBundle),
            Arc::new(NullObserver),
            cancel,
        )
        .await;
        assert!(matches!(cause, TunnelError::Cancelled));
    }

    #[tokio::test]
    async fn dispatch_rejects_empty_mode_without_touching_the_agent() {
        let data_channel = Arc::new(FakeDataChannel::default());
        let request = InitializeRequestV1 {
            version_major: 1,
            version_minor: 0,
            mode: String::new(),
        };
        let payload = bincode::serialize(&request).unwrap();
        let mut framed = Vec::new();
        let mut len_buf = [0u8; framing::varint::MAX_VARINT_LEN];
        let n = framing::varint::encode(payload.len() as u32, &mut len_buf);
        framed.extend_from_slice(&len_buf[..n]);
        framed.extend_from_slice(&payload);

        let dispatch_channel = Arc::clone(&data_channel);
        let dispatch = tokio::spawn(async move {
            dispatch_data_channel(
                dispatch_channel,
                Arc::new(StubBundle),
                Arc::new(NullObserver),
                PathBuf::from("/nonexistent"),
                CancellationToken::new(),
            )
            .await;
        });

        // `dispatch_data_channel` registers its message handler inside
        // `DataChannelConnection::new` before it can read anything;
        // wait for that registration before delivering the message.
        while data_channel.inner.lock().unwrap().on_message.is_none() {
            tokio::task::yield_now().await;
        }
        data_channel.emit_message(bytes::Bytes::from(framed), false).await;
        dispatch.await.unwrap();

        let sent = data_channel.inner.lock().unwrap().sent.clone();
        assert_eq!(sent.len(), 1, "exactly one InitializeResponseV1 should be sent");
        let mut cursor = std::io::Cursor::new(sent[0].to_vec());
        let mut decoder = framing::Decoder::new();
        let response: InitializeResponseV1 = decoder.decode(&mut cursor).await.unwrap().unwrap();
        assert!(!response.is_ok());
    }
}
