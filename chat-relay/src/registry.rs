use std::{collections::BTreeMap, fmt, io, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::frame::{Frame, write_frame};

pub type ClientId = String;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one peer connection.
///
/// Clones share the same socket. Every frame is written under the handle's
/// own lock, so frames sent by different handler tasks never interleave.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Connection>,
}

struct Connection {
    peer: Option<SocketAddr>,
    writer: Mutex<BoxedWriter>,
}

impl ConnectionHandle {
    pub fn new<W>(writer: W, peer: Option<SocketAddr>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Connection {
                peer,
                writer: Mutex::new(Box::new(writer)),
            }),
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub async fn send(&self, frame: &Frame) -> io::Result<()> {
        let mut writer = self.inner.writer.lock().await;
        write_frame(&mut *writer, frame).await
    }

    /// Shuts down the write half. Later sends fail.
    pub async fn close(&self) -> io::Result<()> {
        self.inner.writer.lock().await.shutdown().await
    }

    /// True when both handles refer to the same connection.
    pub fn same_as(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("peer", &self.inner.peer)
            .finish_non_exhaustive()
    }
}

/// Authoritative mapping from client id to live connection.
///
/// Every operation takes the one lock, so operations are atomic with
/// respect to each other. The lock is never held across a network write;
/// callers that fan out take a [`Registry::snapshot`] first.
///
/// Entries are kept in a `BTreeMap` so rosters list ids in a stable order.
#[derive(Default)]
pub struct Registry {
    clients: Mutex<BTreeMap<ClientId, ConnectionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the entry for `id`. Returns the displaced
    /// connection, if any.
    pub async fn add(
        &self,
        id: ClientId,
        connection: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        self.clients.lock().await.insert(id, connection)
    }

    pub async fn remove(&self, id: &str) -> Option<ConnectionHandle> {
        self.clients.lock().await.remove(id)
    }

    /// Removes `id` only while it still maps to `connection`.
    ///
    /// A connection displaced by a later registration under the same id
    /// must not evict its successor when it closes.
    pub async fn release(&self, id: &str, connection: &ConnectionHandle) -> bool {
        let mut clients = self.clients.lock().await;
        match clients.get(id) {
            Some(current) if current.same_as(connection) => {
                clients.remove(id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, id: &str) -> Option<ConnectionHandle> {
        self.clients.lock().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.clients.lock().await.contains_key(id)
    }

    /// Copies the current entries, ordered by id.
    pub async fn snapshot(&self) -> Vec<(ClientId, ConnectionHandle)> {
        self.clients
            .lock()
            .await
            .iter()
            .map(|(id, connection)| (id.clone(), connection.clone()))
            .collect()
    }

    pub async fn ids(&self) -> Vec<ClientId> {
        self.clients.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}
