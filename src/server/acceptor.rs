//! Connection acceptor
//!
//! Accepts connections, gives each a session id and a handler task, and
//! keeps the handlers in a `JoinSet` so shutdown can wait for them.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::connection::ConnectionHandler;
use super::dispatcher::Dispatcher;
use super::state::HandlerState;
use super::{Services, ShutdownSignal};

/// How long handlers get to say goodbye before they are aborted
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Acceptor {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    services: Services,
    shutdown: ShutdownSignal,
    max_frame_bytes: usize,
}

impl Acceptor {
    pub fn new(
        listener: TcpListener,
        dispatcher: Arc<Dispatcher>,
        services: Services,
        shutdown: ShutdownSignal,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            listener,
            dispatcher,
            services,
            shutdown,
            max_frame_bytes,
        }
    }

    /// Accept until shutdown is signalled, then wait for every handler.
    pub async fn run(mut self) {
        let mut handlers: JoinSet<HandlerState> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Connection handler panicked");
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(peer = %peer, error = %e, "TCP_NODELAY not set");
                        }
                        let session = match self.dispatcher.open_session(Some(peer)) {
                            Ok(session) => session,
                            Err(e) => {
                                error!(peer = %peer, code = e.code(), error = %e, "Session refused");
                                continue;
                            }
                        };
                        let handler = ConnectionHandler::new(
                            session,
                            stream,
                            self.dispatcher.clone(),
                            self.services.clone(),
                            self.shutdown.clone(),
                            self.max_frame_bytes,
                        );
                        handlers.spawn(handler.run());
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        info!(live = handlers.len(), "Acceptor stopped, draining sessions");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(joined) = handlers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Connection handler panicked");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(remaining = handlers.len(), "Sessions did not close in time, aborting");
            handlers.abort_all();
        }
    }
}
