//! Node orchestration: load or bootstrap the ledger, then run the event loop.

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::genesis;
use crate::ledger::LedgerStore;
use crate::network::{serve, MessageRouter, PeerRegistry};
use crate::persistence::{Database, InMemoryPersistence, Persistence, PersistenceManager};
use crate::query::NodeQuery;
use parking_lot::RwLock;
use std::fs;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const EVENT_QUEUE_CAPACITY: usize = 1024;

pub struct Node {
    pub config: Config,
    pub ledger: Arc<RwLock<LedgerStore>>,
    pub registry: Arc<RwLock<PeerRegistry>>,
    pub persistence: PersistenceManager,
    pub router: MessageRouter,
}

impl Node {
    /// Opens the snapshot database named in the config (falling back to
    /// in-memory persistence) and loads or bootstraps the ledger.
    pub fn init(config: Config) -> Result<Self> {
        config.validate()?;

        let db_path = std::path::Path::new(&config.persistence.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %e, "Failed to create snapshot directory");
                }
            }
        }

        let backend: Arc<dyn Persistence> = match Database::open(db_path) {
            Ok(db) => Arc::new(db),
            Err(e) => {
                warn!(
                    "Failed to open DB at {}: {}. Falling back to in-memory persistence.",
                    config.persistence.path, e
                );
                Arc::new(InMemoryPersistence::new())
            }
        };
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn Persistence>) -> Self {
        let ledger = Arc::new(RwLock::new(LedgerStore::new()));
        let registry = Arc::new(RwLock::new(PeerRegistry::new()));
        let persistence = PersistenceManager::new(backend, ledger.clone());

        if !persistence.load() {
            genesis::bootstrap(&ledger, &persistence, &config.genesis);
        }

        let router = MessageRouter::new(
            config.node.id.clone(),
            ledger.clone(),
            registry.clone(),
            config.sync.default_block_limit,
        );

        Self {
            config,
            ledger,
            registry,
            persistence,
            router,
        }
    }

    pub fn query(&self) -> NodeQuery {
        NodeQuery::new(self.ledger.clone(), self.registry.clone())
    }

    /// Binds the peer listener and runs until a termination signal arrives.
    /// Failing to bind is the one fatal startup error.
    pub async fn run(self) -> Result<()> {
        let bind = format!("{}:{}", self.config.network.host, self.config.network.p2p_port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| RelayError::NetworkError(format!("P2P port {} unavailable: {}", bind, e)))?;
        self.run_with_listener(listener, shutdown_signal()).await
    }

    /// Event loop: the only place the ledger and registry are mutated.
    /// On `shutdown` the ledger is saved before connections are closed.
    pub async fn run_with_listener<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!(
            node_id = %self.config.node.id,
            addr = %local_addr,
            height = self.ledger.read().height(),
            "Relay node listening"
        );

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let accept_task = tokio::spawn(serve(listener, events_tx));
        let api_task = self.spawn_api();

        let ping_every = Duration::from_secs(self.config.liveness.ping_interval_secs);
        let save_every = Duration::from_secs(self.config.persistence.save_interval_secs);
        let mut ping_timer = interval_at(Instant::now() + ping_every, ping_every);
        let mut save_timer = interval_at(Instant::now() + save_every, save_every);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        save_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => self.router.handle_event(event),
                _ = ping_timer.tick() => {
                    let report = self.router.liveness().sweep();
                    debug!(pinged = report.pinged, evicted = report.evicted_connections, "Liveness sweep");
                }
                _ = save_timer.tick() => {
                    self.persistence.save();
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.persistence.save();
        self.router.close_all();
        accept_task.abort();
        if let Some(task) = api_task {
            task.abort();
        }
        info!("Relay node stopped");
        Ok(())
    }

    #[cfg(feature = "api")]
    fn spawn_api(&self) -> Option<tokio::task::JoinHandle<()>> {
        let port = self.config.network.api_port?;
        let addr: std::net::SocketAddr = match format!("{}:{}", self.config.network.host, port).parse() {
            Ok(addr) => addr,
            Err(e) => {
                error!(error = %e, "Invalid API address");
                return None;
            }
        };
        let query = Arc::new(self.query());
        Some(tokio::spawn(async move {
            if let Err(e) = crate::api::run_api_server(query, addr).await {
                error!("API server failed: {}", e);
            }
        }))
    }

    #[cfg(not(feature = "api"))]
    fn spawn_api(&self) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.network.api_port.is_some() {
            warn!("api_port set but the API feature is not enabled in this build");
        }
        None
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
