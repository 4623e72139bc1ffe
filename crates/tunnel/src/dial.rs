//! Controller-side tunnel establishment: maintains a peer connection
//! and services on-demand requests to open a new agent session over
//! it (the counterpart to [`crate::session::host_tunnel`]'s incoming
//! side).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use transport::adapter::{DataChannel, DataChannelConnection};

use crate::error::{Result, TunnelError};
use crate::initialize::{InitializeRequestV1, InitializeResponseV1};
use crate::rendezvous::RendezvousExchange;
use crate::session::{establish, read_message, write_message, PeerConnection, PeerConnectionFactory, PeerConnectionState};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A stream-oriented connection handed back by a [`DialRequest`],
/// type-erased over the concrete [`DataChannel`] implementation so
/// callers outside this crate (the manager) don't need to name it.
///
/// Mirrors [`DataChannelConnection`]'s own split between
/// [`tokio::io::AsyncRead`] and an explicit `write_all`/`close` pair:
/// the watermark-aware write cannot be expressed as a poll-based
/// [`tokio::io::AsyncWrite`] impl (see that type's doc comment).
pub trait Connection: AsyncRead + Send + Unpin + 'static {
    /// Writes `data`, chunking and backpressure-waiting as the
    /// underlying data channel requires.
    fn write_all<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;
    /// Closes the connection.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

impl<D: DataChannel> Connection for DataChannelConnection<D> {
    fn write_all<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            DataChannelConnection::write_all(self, data)
                .await
                .map_err(TunnelError::from)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { DataChannelConnection::close(self).await.map_err(TunnelError::from) })
    }
}

/// A request to open a new agent session (a fresh data channel,
/// initialized with `mode`) over an established tunnel.
pub struct DialRequest {
    /// The agent mode to request.
    pub mode: String,
    /// Receives the opened connection, or the failure that prevented
    /// it.
    pub respond_to: oneshot::Sender<Result<Box<dyn Connection>>>,
}

/// Parameters identifying the tunnel being dialed into, mirroring
/// [`crate::session::HostConfig`] minus the agent-search fields the
/// controller side never needs (only the hosting side launches
/// agents).
pub struct DialConfig {
    /// Stable tunnel identifier, sent to the rendezvous service.
    pub tunnel_id: String,
    /// Opaque rendezvous credential.
    pub token: String,
    /// HMAC secret used to sign and verify offers.
    pub secret: Vec<u8>,
    /// ICE servers passed to [`PeerConnectionFactory::new_peer_connection`].
    pub ice_servers: Vec<String>,
    /// This side's protocol version, sent in every
    /// [`InitializeRequestV1`] so the host can select a compatible
    /// agent binary.
    pub protocol_version: (u32, u32),
}

/// Label used for every data channel this crate opens on the
/// controller side; the agent side never inspects it.
const DIAL_DATA_CHANNEL_LABEL: &str = "mutagen";

/// Establishes a controller-side tunnel connection and services
/// `dial_rx` until the connection fails terminally or `cancel` fires.
///
/// `status_tx` is updated on every state transition so a supervising
/// caller (the manager's per-tunnel controller) can surface
/// `Connecting`/`Connected`/... without polling.
///
/// Always returns a [`TunnelError`]; callers classify it with
/// [`TunnelError::severity`] to decide whether and when to reconnect,
/// exactly as [`crate::session::host_tunnel`]'s callers do.
pub async fn connect_tunnel<F>(
    factory: &F,
    rendezvous: &dyn RendezvousExchange,
    config: &DialConfig,
    dial_rx: &mut mpsc::Receiver<DialRequest>,
    status_tx: watch::Sender<PeerConnectionState>,
    cancel: CancellationToken,
) -> TunnelError
where
    F: PeerConnectionFactory,
{
    match connect_tunnel_inner(factory, rendezvous, config, dial_rx, &status_tx, cancel).await {
        Ok(cause) | Err(cause) => cause,
    }
}

async fn connect_tunnel_inner<F>(
    factory: &F,
    rendezvous: &dyn RendezvousExchange,
    config: &DialConfig,
    dial_rx: &mut mpsc::Receiver<DialRequest>,
    status_tx: &watch::Sender<PeerConnectionState>,
    cancel: CancellationToken,
) -> std::result::Result<TunnelError, TunnelError>
where
    F: PeerConnectionFactory,
{
    let _ = status_tx.send(PeerConnectionState::Connecting);

    let connection = establish(
        factory,
        rendezvous,
        &config.tunnel_id,
        &config.token,
        &config.secret,
        &config.ice_servers,
    )
    .await?;
    let connection = Arc::new(connection);

    let (change_tx, mut change_rx) = watch::channel(PeerConnectionState::New);
    connection
        .on_state_change(Box::new(move |state| {
            let change_tx = change_tx.clone();
            Box::pin(async move {
                let _ = change_tx.send(state);
            })
        }))
        .await;
    let _ = status_tx.send(PeerConnectionState::Connected);

    let cause = loop {
        tokio::select! {
            () = cancel.cancelled() => break TunnelError::Cancelled,
            changed = change_rx.changed() => {
                if changed.is_err() {
                    break TunnelError::PeerConnectionState("closed".to_string());
                }
                let state = *change_rx.borrow();
                let _ = status_tx.send(state);
                if matches!(
                    state,
                    PeerConnectionState::Disconnected
                        | PeerConnectionState::Failed
                        | PeerConnectionState::Closed
                ) {
                    break TunnelError::PeerConnectionState(format!("{state:?}"));
                }
            }
            request = dial_rx.recv() => {
                let Some(request) = request else {
                    // The controller dropped its sending half; keep
                    // monitoring connection health with no dials left
                    // to service.
                    continue;
                };
                let connection = Arc::clone(&connection);
                let protocol_version = config.protocol_version;
                tokio::spawn(async move {
                    let outcome = open_agent_session(connection.as_ref(), &request.mode, protocol_version).await;
                    let _ = request.respond_to.send(outcome);
                });
            }
        }
    };

    let _ = connection.close().await;
    Ok(cause)
}

/// Drains `dial_rx`, answering every queued request with a
/// disconnected error, for the interval between reconnect attempts
/// when there is no live connection to dial against.
pub async fn reject_pending_dials(dial_rx: &mut mpsc::Receiver<DialRequest>, duration: std::time::Duration) {
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => return,
            request = dial_rx.recv() => {
                let Some(request) = request else { return };
                let _ = request.respond_to.send(Err(TunnelError::PeerConnectionState(
                    "disconnected".to_string(),
                )));
            }
        }
    }
}

async fn open_agent_session<P>(
    connection: &P,
    mode: &str,
    protocol_version: (u32, u32),
) -> Result<Box<dyn Connection>>
where
    P: PeerConnection,
{
    let data_channel = connection.create_data_channel(DIAL_DATA_CHANNEL_LABEL).await?;
    let mut adapted = DataChannelConnection::new(data_channel).await;

    let request = InitializeRequestV1 {
        version_major: protocol_version.0,
        version_minor: protocol_version.1,
        mode: mode.to_string(),
    };
    write_message(&adapted, &request).await?;

    let response: InitializeResponseV1 = read_message(&mut adapted).await?.ok_or_else(|| {
        TunnelError::InvalidInitializeRequest("data channel closed before responding".to_string())
    })?;
    if !response.is_ok() {
        return Err(TunnelError::InvalidInitializeRequest(response.error));
    }

    Ok(Box::new(adapted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous::{ExchangeRequest, ExchangeResponse};
    use crate::signature::{encode, sign_offer};
    use std::sync::Mutex as StdMutex;
    use transport::adapter::{
        OnBufferedAmountLowHandler, OnCloseHandler, OnErrorHandler, OnMessageHandler, OnOpenHandler,
    };

    #[derive(Default)]
    struct FakeDataChannel {
        sent: StdMutex<Vec<bytes::Bytes>>,
    }

    impl DataChannel for FakeDataChannel {
        fn on_open(&self, _f: OnOpenHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_close(&self, _f: OnCloseHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_error(&self, _f: OnErrorHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_message(&self, _f: OnMessageHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn set_buffered_amount_low_threshold(&self, _threshold: usize) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_buffered_amount_low(&self, _f: OnBufferedAmountLowHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn send(&self, data: bytes::Bytes) -> BoxFuture<'_, std::result::Result<usize, transport::TransportError>> {
            let len = data.len();
            self.sent.lock().unwrap().push(data);
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
        fn exchange<'a>(&'a self, _request: &'a ExchangeRequest) -> BoxFuture<'a, Result<ExchangeResponse>> {
            Box::pin(async move {
                Ok(ExchangeResponse {
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
        fn on_state_change(&self, _f: crate::session::OnStateChangeHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_data_channel(
            &self,
            _f: crate::session::OnDataChannelHandler<Self::DataChannel>,
        ) -> BoxFuture<'_, ()> {
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

    fn dial_config() -> DialConfig {
        DialConfig {
            tunnel_id: "tunnel-1".to_string(),
            token: "token".to_string(),
            secret: b"a shared secret of decent length".to_vec(),
            ice_servers: vec!["stun:stun.example.com:3478".to_string()],
            protocol_version: (1, 0),
        }
    }

    #[tokio::test]
    async fn signature_mismatch_is_unrecoverable_before_any_dial_is_serviced() {
        let factory = FakeFactory {
            offer: "v=0 offer".to_string(),
        };
        let rendezvous = StubRendezvous {
            peer_offer: b"v=0 peer-offer".to_vec(),
            peer_signature: b"not a valid signature".to_vec(),
        };
        let config = dial_config();
        let (_dial_tx, mut dial_rx) = mpsc::channel(1);
        let (status_tx, _status_rx) = watch::channel(PeerConnectionState::New);

        let cause = connect_tunnel(
            &factory,
            &rendezvous,
            &config,
            &mut dial_rx,
            status_tx,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(cause, TunnelError::SignatureMismatch));
        assert_eq!(cause.severity(), crate::error::Severity::Unrecoverable);
    }

    #[tokio::test]
    async fn cancellation_stops_an_established_connection() {
        let offer = "v=0 offer".to_string();
        let signature = sign_offer(offer.as_bytes(), &dial_config().secret);
        let factory = FakeFactory { offer: offer.clone() };
        let rendezvous = StubRendezvous {
            peer_offer: offer.into_bytes(),
            peer_signature: signature,
        };
        let config = dial_config();
        let (_dial_tx, mut dial_rx) = mpsc::channel(1);
        let (status_tx, mut status_rx) = watch::channel(PeerConnectionState::New);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let cause = connect_tunnel(&factory, &rendezvous, &config, &mut dial_rx, status_tx, cancel).await;

        assert!(matches!(cause, TunnelError::Cancelled));
        assert_eq!(*status_rx.borrow_and_update(), PeerConnectionState::Connected);
    }

    #[tokio::test]
    async fn reject_pending_dials_answers_every_queued_request() {
        let (dial_tx, mut dial_rx) = mpsc::channel(4);
        let (done_tx, done_rx) = oneshot::channel();
        dial_tx
            .send(DialRequest {
                mode: "agent".to_string(),
                respond_to: done_tx,
            })
            .await
            .unwrap();
        drop(dial_tx);

        reject_pending_dials(&mut dial_rx, std::time::Duration::from_millis(50)).await;

        let outcome = done_rx.await.unwrap();
        assert!(matches!(outcome, Err(TunnelError::PeerConnectionState(_))));
    }
}
