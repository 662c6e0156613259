use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tracing::{debug, info, warn};

use crate::{
    handler::ConnectionHandler,
    registry::{ConnectionHandle, Registry},
    router::Router,
};

/// Limits applied to accepted connections. The default is unbounded with
/// no idle timeout.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub max_connections: Option<usize>,
    pub idle_timeout: Option<Duration>,
}

pub struct Relay {
    listener: TcpListener,
    router: Router,
    config: RelayConfig,
}

impl Relay {
    pub fn new(listener: TcpListener) -> Self {
        Self::with_config(listener, RelayConfig::default())
    }

    pub fn with_config(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            router: Router::new(Arc::new(Registry::new())),
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.router.registry())
    }

    /// Accepts connections until `shutdown` resolves. Connections already
    /// being served keep running; there is no drain.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay {
            listener,
            router,
            config,
        } = self;
        let admission = config.max_connections.map(|max| Arc::new(Semaphore::new(max)));
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &router, &config, admission.as_ref());
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    router: &Router,
    config: &RelayConfig,
    admission: Option<&Arc<Semaphore>>,
) {
    let (stream, peer) = match result {
        Ok(accepted) => accepted,
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            return;
        }
    };

    let permit = match admission.map(|limit| Arc::clone(limit).try_acquire_owned()) {
        None => None,
        Some(Ok(permit)) => Some(permit),
        Some(Err(_)) => {
            warn!(peer = %peer, "connection limit reached, rejecting");
            return;
        }
    };

    debug!(peer = %peer, "accepted connection");
    spawn_connection_handler(stream, peer, router, config, permit);
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    router: &Router,
    config: &RelayConfig,
    permit: Option<OwnedSemaphorePermit>,
) {
    let router = router.clone();
    let idle_timeout = config.idle_timeout;
    tokio::spawn(async move {
        // Held until the handler finishes.
        let _permit = permit;
        if let Err(err) = handle_connection(stream, router, idle_timeout).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
        info!(peer = %peer, "connection closed");
    });
}

async fn handle_connection(
    stream: TcpStream,
    router: Router,
    idle_timeout: Option<Duration>,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (mut reader, writer) = stream.into_split();
    let connection = ConnectionHandle::new(writer, peer);

    ConnectionHandler::new(router, connection)
        .with_idle_timeout(idle_timeout)
        .run(&mut reader)
        .await
        .with_context(|| format!("connection from {peer:?} failed"))
}
