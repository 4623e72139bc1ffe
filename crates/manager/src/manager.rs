//! The tunnel registry: a thread-safe map from identifier to
//! [`Controller`], backed by [`Store`] persistence and a [`Tracker`]
//! change index.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use config::labels::Labels;
use config::selection::Selection;
use rpc::broker::PrompterBroker;
use tunnel::dial::Connection as TunnelConnection;
use tunnel::rendezvous::RendezvousExchange;
use tunnel::session::PeerConnectionFactory;

use crate::controller::Controller;
use crate::record::{Tunnel, TunnelHostCredentials, TunnelState};
use crate::selection::{self, Candidate};
use crate::store::Store;
use crate::tracker::Tracker;
use crate::{ManagerError, Result};

/// Parameters for [`Manager::create`], mirroring the tunnel
/// configuration fields a caller supplies up front.
pub struct CreateConfig {
    /// ICE servers for the peer-connection factory.
    pub ice_servers: Vec<String>,
}

/// The tunnel registry: owns every tunnel's persisted record and live
/// [`Controller`], generic over the [`PeerConnectionFactory`]
/// implementation shared by every controller it spawns.
pub struct Manager<F: PeerConnectionFactory> {
    store: Store,
    controllers: DashMap<String, Arc<Controller>>,
    tracker: Tracker,
    factory: Arc<F>,
    rendezvous: Arc<dyn RendezvousExchange>,
    broker: Arc<PrompterBroker>,
    protocol_version: (u32, u32),
}

impl<F: PeerConnectionFactory> Manager<F> {
    /// Opens the tunnel store at `directory`, loading every persisted
    /// tunnel and starting its reconnect loop.
    pub async fn new(
        directory: impl Into<std::path::PathBuf>,
        factory: Arc<F>,
        rendezvous: Arc<dyn RendezvousExchange>,
        broker: Arc<PrompterBroker>,
        protocol_version: (u32, u32),
    ) -> Result<Self> {
        let store = Store::open(directory).await?;
        let tunnels = store.load_all().await?;

        let manager = Self {
            store,
            controllers: DashMap::new(),
            tracker: Tracker::new(),
            factory,
            rendezvous,
            broker,
            protocol_version,
        };

        for tunnel in tunnels {
            let identifier = tunnel.identifier.clone();
            let controller = Controller::new(
                tunnel,
                false,
                manager.protocol_version,
                Arc::clone(&manager.factory),
                Arc::clone(&manager.rendezvous),
            );
            manager.controllers.insert(identifier, Arc::new(controller));
        }

        Ok(manager)
    }

    /// Creates a new tunnel, persists it, and (unless `paused`) starts
    /// its reconnect loop.
    pub async fn create(
        &self,
        cancel: CancellationToken,
        config: CreateConfig,
        name: String,
        labels: Labels,
        paused: bool,
        prompter_id: &str,
    ) -> Result<TunnelHostCredentials> {
        config::labels::validate(&labels)?;

        let tunnel = Tunnel::new(name, labels, config.ice_servers);
        self.store.save(&tunnel).await?;

        let _ = self
            .broker
            .message(prompter_id, format!("Created tunnel {}", tunnel.identifier))
            .await;
        if cancel.is_cancelled() {
            return Err(ManagerError::Cancelled);
        }

        let controller = Controller::new(
            tunnel.clone(),
            paused,
            self.protocol_version,
            Arc::clone(&self.factory),
            Arc::clone(&self.rendezvous),
        );
        self.controllers.insert(tunnel.identifier.clone(), Arc::new(controller));
        self.tracker.bump();

        Ok(tunnel)
    }

    /// Opens a new agent session on the tunnel identified by
    /// `id_or_name`.
    pub async fn dial(
        &self,
        cancel: CancellationToken,
        id_or_name: &str,
        mode: String,
        prompter_id: &str,
    ) -> Result<Box<dyn TunnelConnection>> {
        let identifier = self.resolve_one(id_or_name)?;
        let controller = self.controller(&identifier)?;

        let _ = self.broker.message(prompter_id, format!("Connecting to tunnel {identifier}")).await;

        tokio::select! {
            () = cancel.cancelled() => Err(ManagerError::Cancelled),
            outcome = controller.dial(mode) => outcome,
        }
    }

    /// Waits for the registry's state index to move past
    /// `previous_index` (or `cancel` to fire, or the manager to be
    /// shut down), then returns the new index and every matching
    /// tunnel's masked state, sorted by creation time.
    pub async fn list(
        &self,
        cancel: CancellationToken,
        selection: &Selection,
        previous_index: u64,
    ) -> Result<(u64, Vec<TunnelState>)> {
        let index = self.tracker.wait_for_change(previous_index, &cancel).await?;

        let matched = self.resolve(selection)?;
        let mut states: Vec<TunnelState> = matched
            .iter()
            .filter_map(|id| self.controllers.get(id).map(|entry| entry.state().masked()))
            .collect();
        states.sort_by_key(|state| state.tunnel.creation_time);

        Ok((index, states))
    }

    /// Pauses every tunnel matched by `selection`.
    pub async fn pause(&self, selection: &Selection) -> Result<()> {
        let matched = self.resolve(selection)?;
        for id in matched {
            if let Some(controller) = self.controllers.get(&id) {
                controller.pause().await;
            }
        }
        self.tracker.bump();
        Ok(())
    }

    /// Resumes every tunnel matched by `selection`.
    pub async fn resume(&self, selection: &Selection) -> Result<()> {
        let matched = self.resolve(selection)?;
        for id in matched {
            if let Some(controller) = self.controllers.get(&id) {
                controller.resume(Arc::clone(&self.factory), Arc::clone(&self.rendezvous)).await;
            }
        }
        self.tracker.bump();
        Ok(())
    }

    /// Terminates every tunnel matched by `selection`: halts its
    /// controller, removes it from the registry, and deletes its
    /// persisted record.
    pub async fn terminate(&self, selection: &Selection) -> Result<()> {
        let matched = self.resolve(selection)?;
        for id in matched {
            if let Some((_, controller)) = self.controllers.remove(&id) {
                controller.terminate().await;
            }
            if let Err(err) = self.store.delete(&id).await {
                warn!(identifier = %id, error = %err, "failed to delete terminated tunnel's persisted record");
            }
        }
        self.tracker.bump();
        Ok(())
    }

    /// Poisons the change tracker and halts every controller. Further
    /// `List` calls observe [`ManagerError::Poisoned`]; the registry
    /// itself is left intact (this is a process-shutdown operation,
    /// not a bulk terminate).
    pub async fn shutdown(&self) {
        self.tracker.poison();
        for entry in self.controllers.iter() {
            entry.value().pause().await;
        }
    }

    fn controller(&self, identifier: &str) -> Result<Arc<Controller>> {
        self.controllers
            .get(identifier)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ManagerError::NotFound(identifier.to_string()))
    }

    fn resolve_one(&self, id_or_name: &str) -> Result<String> {
        let candidates: Vec<Tunnel> = self.controllers.iter().map(|entry| entry.value().tunnel()).collect();
        let borrowed: Vec<Candidate<'_>> = candidates
            .iter()
            .map(|tunnel| Candidate {
                identifier: &tunnel.identifier,
                name: &tunnel.name,
                labels: &tunnel.labels,
            })
            .collect();
        selection::resolve_one(id_or_name, &borrowed)
    }

    fn resolve(&self, selection: &Selection) -> Result<Vec<String>> {
        let candidates: Vec<Tunnel> = self.controllers.iter().map(|entry| entry.value().tunnel()).collect();
        let borrowed: Vec<Candidate<'_>> = candidates
            .iter()
            .map(|tunnel| Candidate {
                identifier: &tunnel.identifier,
                name: &tunnel.name,
                labels: &tunnel.labels,
            })
            .collect();
        selection::resolve(selection, &borrowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;

    type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

    struct FakeDataChannel;

    impl transport::adapter::DataChannel for FakeDataChannel {
        fn on_open(&self, _f: transport::adapter::OnOpenHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_close(&self, _f: transport::adapter::OnCloseHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_error(&self, _f: transport::adapter::OnErrorHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_message(&self, _f: transport::adapter::OnMessageHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn set_buffered_amount_low_threshold(&self, _threshold: usize) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_buffered_amount_low(&self, _f: transport::adapter::OnBufferedAmountLowHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn send(&self, data: bytes::Bytes) -> BoxFuture<'_, std::result::Result<usize, transport::TransportError>> {
            Box::pin(async move { Ok(data.len()) })
        }
        fn buffered_amount(&self) -> BoxFuture<'_, usize> {
            Box::pin(async { 0 })
        }
        fn close(&self) -> BoxFuture<'_, std::result::Result<(), transport::TransportError>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct StubRendezvous;

    impl RendezvousExchange for StubRendezvous {
        fn exchange<'a>(
            &'a self,
            _request: &'a tunnel::rendezvous::ExchangeRequest,
        ) -> BoxFuture<'a, tunnel::Result<tunnel::rendezvous::ExchangeResponse>> {
            Box::pin(async move { Err(tunnel::TunnelError::Unauthorized) })
        }
    }

    struct FakePeerConnection;

    impl tunnel::session::PeerConnection for FakePeerConnection {
        type DataChannel = FakeDataChannel;

        fn create_offer(&self) -> BoxFuture<'_, tunnel::Result<String>> {
            Box::pin(async { Ok("v=0 offer".to_string()) })
        }
        fn set_local_description(&self, _description: String) -> BoxFuture<'_, tunnel::Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn set_remote_description(&self, _description: String) -> BoxFuture<'_, tunnel::Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn on_state_change(&self, _f: tunnel::session::OnStateChangeHandler) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn on_data_channel(
            &self,
            _f: tunnel::session::OnDataChannelHandler<Self::DataChannel>,
        ) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn create_data_channel(&self, _label: &str) -> BoxFuture<'_, tunnel::Result<Arc<Self::DataChannel>>> {
            Box::pin(async { Ok(Arc::new(FakeDataChannel)) })
        }
        fn close(&self) -> BoxFuture<'_, tunnel::Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct FakeFactory;

    impl PeerConnectionFactory for FakeFactory {
        type Connection = FakePeerConnection;

        fn new_peer_connection(&self, _ice_servers: &[String]) -> BoxFuture<'_, tunnel::Result<Self::Connection>> {
            Box::pin(async { Ok(FakePeerConnection) })
        }
    }

    async fn test_manager(dir: &std::path::Path) -> Manager<FakeFactory> {
        Manager::new(
            dir,
            Arc::new(FakeFactory),
            Arc::new(StubRendezvous),
            Arc::new(PrompterBroker::new()),
            (1, 0),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_persists_and_registers_a_tunnel() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path()).await;

        let credentials = manager
            .create(
                CancellationToken::new(),
                CreateConfig { ice_servers: vec![] },
                "dev".to_string(),
                Labels::new(),
                true,
                "",
            )
            .await
            .unwrap();

        assert_eq!(credentials.name, "dev");
        let (_, states) = manager
            .list(CancellationToken::new(), &Selection::All, 0)
            .await
            .unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].tunnel.identifier, credentials.identifier);
        assert_eq!(states[0].tunnel.token, config::mask::MASKED_TOKEN);
    }

    #[tokio::test]
    async fn create_rejects_invalid_labels() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path()).await;

        let mut labels = Labels::new();
        labels.insert("bad key".to_string(), "value".to_string());
        let err = manager
            .create(
                CancellationToken::new(),
                CreateConfig { ice_servers: vec![] },
                "dev".to_string(),
                labels,
                true,
                "",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Config(_)));
    }

    #[tokio::test]
    async fn dial_on_unknown_tunnel_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path()).await;
        let err = manager
            .dial(CancellationToken::new(), "missing", "agent".to_string(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::NotFound(_)));
    }

    #[tokio::test]
    async fn dial_on_paused_tunnel_is_paused_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path()).await;
        let credentials = manager
            .create(
                CancellationToken::new(),
                CreateConfig { ice_servers: vec![] },
                "dev".to_string(),
                Labels::new(),
                true,
                "",
            )
            .await
            .unwrap();

        let err = manager
            .dial(CancellationToken::new(), &credentials.identifier, "agent".to_string(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Paused(_)));
    }

    #[tokio::test]
    async fn terminate_removes_from_registry_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path()).await;
        let credentials = manager
            .create(
                CancellationToken::new(),
                CreateConfig { ice_servers: vec![] },
                "dev".to_string(),
                Labels::new(),
                true,
                "",
            )
            .await
            .unwrap();

        let selection =
            Selection::specifications(vec![config::selection::Specification(credentials.identifier.clone())])
                .unwrap();
        manager.terminate(&selection).await.unwrap();

        let (_, states) = manager
            .list(CancellationToken::new(), &Selection::All, 0)
            .await
            .unwrap();
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn list_blocks_until_a_change_and_returns_an_advanced_index() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(test_manager(dir.path()).await);

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.list(CancellationToken::new(), &Selection::All, 0).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        manager
            .create(
                CancellationToken::new(),
                CreateConfig { ice_servers: vec![] },
                "dev".to_string(),
                Labels::new(),
                true,
                "",
            )
            .await
            .unwrap();

        let (index, states) = waiter.await.unwrap().unwrap();
        assert_eq!(index, 1);
        assert_eq!(states.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_poisons_subsequent_list_calls() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path()).await;
        manager.shutdown().await;

        let err = manager
            .list(CancellationToken::new(), &Selection::All, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Poisoned));
    }
}
