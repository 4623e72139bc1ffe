//! Per-tunnel supervisor: owns the reconnect loop built from
//! [`tunnel::dial::connect_tunnel`], the live connectivity state a
//! [`crate::record::TunnelState`] snapshot is built from, and the
//! pause/resume/terminate lifecycle the manager's registry drives.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tunnel::dial::{connect_tunnel, reject_pending_dials, Connection as TunnelConnection, DialConfig, DialRequest};
use tunnel::session::{PeerConnectionFactory, PeerConnectionState, HOST_TUNNEL_RETRY_DELAY};
use tunnel::Severity;

use crate::record::{Status, Tunnel, TunnelState};
use crate::{ManagerError, Result};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Channel capacity for a controller's dial request queue: enough to
/// absorb a burst of concurrent `Dial` callers without forcing them to
/// wait on queue space in addition to connection establishment.
const DIAL_QUEUE_DEPTH: usize = 32;

/// The live connectivity state a controller tracks alongside the
/// tunnel's persisted record.
#[derive(Debug, Clone)]
struct RuntimeState {
    status: Status,
    active_sessions: u64,
    total_sessions: u64,
    last_error: Option<String>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            status: Status::Disconnected,
            active_sessions: 0,
            total_sessions: 0,
            last_error: None,
        }
    }
}

struct RunningTask {
    cancel: CancellationToken,
    dial_tx: mpsc::Sender<DialRequest>,
    handle: JoinHandle<()>,
}

/// Supervises one tunnel's peer connection: reconnect-with-backoff,
/// on-demand data-channel dials, and pause/resume/terminate.
pub struct Controller {
    tunnel: StdMutex<Tunnel>,
    runtime: Arc<watch::Sender<RuntimeState>>,
    task: AsyncMutex<Option<RunningTask>>,
    protocol_version: (u32, u32),
}

impl Controller {
    /// Builds a controller for `tunnel`, starting its reconnect loop
    /// immediately unless `paused`.
    pub fn new<F>(
        tunnel: Tunnel,
        paused: bool,
        protocol_version: (u32, u32),
        factory: Arc<F>,
        rendezvous: Arc<dyn tunnel::rendezvous::RendezvousExchange>,
    ) -> Self
    where
        F: PeerConnectionFactory,
    {
        let controller = Self {
            tunnel: StdMutex::new(tunnel),
            runtime: Arc::new(watch::channel(RuntimeState::default()).0),
            task: AsyncMutex::new(None),
            protocol_version,
        };
        if !paused {
            controller.spawn(factory, rendezvous);
        }
        controller
    }

    /// Returns this controller's tunnel identifier.
    pub fn identifier(&self) -> String {
        self.tunnel.lock().unwrap().identifier.clone()
    }

    /// Returns a clone of the persisted tunnel record.
    pub fn tunnel(&self) -> Tunnel {
        self.tunnel.lock().unwrap().clone()
    }

    /// Returns a snapshot combining the persisted record with live
    /// connectivity state.
    pub fn state(&self) -> TunnelState {
        let tunnel = self.tunnel.lock().unwrap().clone();
        let runtime = self.runtime.borrow().clone();
        TunnelState {
            tunnel,
            status: runtime.status,
            active_sessions: runtime.active_sessions,
            total_sessions: runtime.total_sessions,
            last_error: runtime.last_error,
        }
    }

    /// Returns whether the controller currently has a live reconnect
    /// loop (i.e. is not paused).
    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    fn spawn<F>(&self, factory: Arc<F>, rendezvous: Arc<dyn tunnel::rendezvous::RendezvousExchange>)
    where
        F: PeerConnectionFactory,
    {
        let task = self.build_task(factory, rendezvous);
        // Replacing `task` is only ever done while holding the async
        // mutex (see `resume`); the constructor path has exclusive
        // access to `self` so a blocking try_lock suffices here.
        let mut guard = self
            .task
            .try_lock()
            .expect("constructor holds exclusive access to the controller");
        *guard = Some(task);
    }

    fn build_task<F>(&self, factory: Arc<F>, rendezvous: Arc<dyn tunnel::rendezvous::RendezvousExchange>) -> RunningTask
    where
        F: PeerConnectionFactory,
    {
        let (dial_tx, dial_rx) = mpsc::channel(DIAL_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        let config = {
            let tunnel = self.tunnel.lock().unwrap();
            DialConfig {
                tunnel_id: tunnel.identifier.clone(),
                token: tunnel.token.clone(),
                secret: tunnel.secret.clone(),
                ice_servers: tunnel.configuration.ice_servers.clone(),
                protocol_version: self.protocol_version,
            }
        };
        let runtime = Arc::clone(&self.runtime);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run_loop(factory, rendezvous, config, dial_rx, runtime, loop_cancel).await;
        });
        RunningTask { cancel, dial_tx, handle }
    }

    /// Stops the reconnect loop without dropping the tunnel from the
    /// registry. Idempotent.
    pub async fn pause(&self) {
        let running = self.task.lock().await.take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(err) = running.handle.await {
                warn!(error = %err, "tunnel reconnect loop task panicked");
            }
        }
        self.runtime.send_modify(|state| state.status = Status::Disconnected);
    }

    /// Starts the reconnect loop if it is not already running.
    /// Idempotent.
    pub async fn resume<F>(&self, factory: Arc<F>, rendezvous: Arc<dyn tunnel::rendezvous::RendezvousExchange>)
    where
        F: PeerConnectionFactory,
    {
        let mut guard = self.task.lock().await;
        if guard.is_some() {
            return;
        }
        *guard = Some(self.build_task(factory, rendezvous));
    }

    /// Stops the reconnect loop permanently; the caller (the manager)
    /// is responsible for removing the controller from the registry
    /// and deleting its persisted record.
    pub async fn terminate(&self) {
        self.pause().await;
    }

    /// Updates the tunnel's mutable `name` and `labels` fields.
    pub fn update(&self, name: Option<String>, labels: Option<config::labels::Labels>) -> Tunnel {
        let mut tunnel = self.tunnel.lock().unwrap();
        if let Some(name) = name {
            tunnel.name = name;
        }
        if let Some(labels) = labels {
            tunnel.labels = labels;
        }
        tunnel.clone()
    }

    /// Opens a new agent session over this tunnel's live connection.
    pub async fn dial(&self, mode: String) -> Result<Box<dyn TunnelConnection>> {
        let dial_tx = {
            let guard = self.task.lock().await;
            match guard.as_ref() {
                Some(running) => running.dial_tx.clone(),
                None => return Err(ManagerError::Paused(self.identifier())),
            }
        };

        self.runtime.send_modify(|state| state.total_sessions += 1);

        let (respond_to, response) = oneshot::channel();
        dial_tx
            .send(DialRequest { mode, respond_to })
            .await
            .map_err(|_| ManagerError::Paused(self.identifier()))?;

        let connection = response
            .await
            .map_err(|_| ManagerError::Cancelled)?
            .map_err(ManagerError::Tunnel)?;

        Ok(Box::new(TrackedConnection::new(connection, Arc::clone(&self.runtime))))
    }
}

/// Drives reconnection for the lifetime of one resume/pause cycle:
/// repeatedly calls [`connect_tunnel`], classifying each failure with
/// [`tunnel::error::TunnelError::severity`] to decide whether to retry
/// immediately, after a delay, or not at all.
async fn run_loop<F>(
    factory: Arc<F>,
    rendezvous: Arc<dyn tunnel::rendezvous::RendezvousExchange>,
    config: DialConfig,
    mut dial_rx: mpsc::Receiver<DialRequest>,
    runtime: Arc<watch::Sender<RuntimeState>>,
    cancel: CancellationToken,
) where
    F: PeerConnectionFactory,
{
    let (status_tx, mut status_rx) = watch::channel(PeerConnectionState::New);
    let forward_runtime = Arc::clone(&runtime);
    let forward_cancel = cancel.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = forward_cancel.cancelled() => return,
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let observed = *status_rx.borrow();
                    forward_runtime.send_modify(|state| state.status = map_peer_state(observed));
                }
            }
        }
    });

    while !cancel.is_cancelled() {
        let cause = connect_tunnel(
            factory.as_ref(),
            rendezvous.as_ref(),
            &config,
            &mut dial_rx,
            status_tx.clone(),
            cancel.clone(),
        )
        .await;

        let is_cancelled = matches!(cause, tunnel::TunnelError::Cancelled);
        runtime.send_modify(|state| {
            state.status = Status::Disconnected;
            state.last_error = Some(cause.to_string());
        });

        match cause.severity() {
            Severity::Unrecoverable => break,
            Severity::DelayedRecoverable => {
                reject_pending_dials(&mut dial_rx, HOST_TUNNEL_RETRY_DELAY).await;
            }
            Severity::Recoverable => {
                if is_cancelled {
                    break;
                }
            }
        }
    }

    forwarder.abort();
}

fn map_peer_state(state: PeerConnectionState) -> Status {
    match state {
        PeerConnectionState::New | PeerConnectionState::Connecting => Status::Connecting,
        PeerConnectionState::Connected => Status::Connected,
        PeerConnectionState::Disconnected | PeerConnectionState::Failed | PeerConnectionState::Closed => {
            Status::Disconnected
        }
    }
}

/// Wraps a dialed connection so the controller's `active_sessions`
/// counter is decremented automatically when the caller drops it,
/// mirroring [`tunnel::session::SessionObserver`]'s role on the host
/// side.
struct TrackedConnection {
    inner: Box<dyn TunnelConnection>,
    runtime: Arc<watch::Sender<RuntimeState>>,
}

impl TrackedConnection {
    fn new(inner: Box<dyn TunnelConnection>, runtime: Arc<watch::Sender<RuntimeState>>) -> Self {
        runtime.send_modify(|state| state.active_sessions += 1);
        Self { inner, runtime }
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        self.runtime
            .send_modify(|state| state.active_sessions = state.active_sessions.saturating_sub(1));
    }
}

impl AsyncRead for TrackedConnection {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

impl TunnelConnection for TrackedConnection {
    fn write_all<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, tunnel::Result<()>> {
        self.inner.write_all(data)
    }

    fn close(&self) -> BoxFuture<'_, tunnel::Result<()>> {
        self.inner.close()
    }
}
