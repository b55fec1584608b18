//! QARS server: acceptor, per-session handlers and the dispatcher.

pub mod acceptor;
pub mod batch;
pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod state;

pub use acceptor::Acceptor;
pub use batch::{BatchState, TransferBatch};
pub use connection::ConnectionHandler;
pub use dispatcher::{Dispatcher, Reply};
pub use registry::{SessionInfo, SessionRegistry};
pub use state::HandlerState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::collaborators::{
    FileSystemView, ImpactAnalyzer, LocalFileSystem, Notifier, ScriptImpactAnalyzer, build_notifier,
};
use crate::config::AppConfig;
use crate::error::QarsError;

// ============================================================
// Collaborators
// ============================================================

/// External collaborators shared by the dispatcher and every handler
#[derive(Clone)]
pub struct Services {
    pub notifier: Arc<dyn Notifier>,
    pub fs: Arc<dyn FileSystemView>,
    pub impact: Arc<dyn ImpactAnalyzer>,
}

impl Services {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            notifier: build_notifier(&config.notify),
            fs: Arc::new(LocalFileSystem),
            impact: Arc::new(ScriptImpactAnalyzer::from_config(&config.impact)),
        }
    }
}

// ============================================================
// Shutdown
// ============================================================

#[derive(Debug)]
pub struct ShutdownHandle(watch::Sender<bool>);

impl ShutdownHandle {
    pub fn new() -> (Self, ShutdownSignal) {
        let (sender, receiver) = watch::channel(false);
        (Self(sender), ShutdownSignal(receiver))
    }

    pub fn signal(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once shutdown is signalled (immediately if it already was)
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }

    pub fn is_signalled(&self) -> bool {
        *self.0.borrow()
    }
}

// ============================================================
// Server
// ============================================================

/// A running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownHandle,
    acceptor: JoinHandle<()>,
}

impl ServerHandle {
    /// Load state, bind the listener and start accepting
    pub async fn start(config: &AppConfig, services: Services) -> Result<Self, QarsError> {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::open(config, &services, registry)?);

        let bind_addr = config.server.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| QarsError::Config(format!("Failed to bind {}: {}", bind_addr, e)))?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, server_track = dispatcher.server_track(), "QARS server listening");
        dispatcher.activity().record(
            dispatcher.server_track(),
            &format!("Server started on port {}", local_addr.port()),
        );

        let (shutdown, signal) = ShutdownHandle::new();
        let acceptor = Acceptor::new(
            listener,
            dispatcher.clone(),
            services,
            signal,
            config.server.max_frame_bytes,
        );
        let acceptor = tokio::spawn(acceptor.run());

        Ok(Self {
            local_addr,
            dispatcher,
            shutdown,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Tell every session to close, wait for them, then flush all state
    pub async fn shutdown(self) -> Result<(), QarsError> {
        info!(live_sessions = self.dispatcher.registry().len(), "Shutting down");
        self.shutdown.signal();
        if let Err(e) = self.acceptor.await {
            error!(error = %e, "Acceptor task failed");
        }
        self.dispatcher.shutdown()?;
        info!("Shutdown complete");
        Ok(())
    }
}

/// Serve until `stop` resolves, then shut down cleanly
pub async fn run_server<F>(config: &AppConfig, services: Services, stop: F) -> Result<(), QarsError>
where
    F: Future<Output = ()>,
{
    let server = ServerHandle::start(config, services).await?;
    stop.await;
    server.shutdown().await
}
