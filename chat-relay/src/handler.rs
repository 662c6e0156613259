//! Per-connection state machine.
//!
//! A handler owns the read half of one connection. It reads fixed-size
//! frames, classifies each payload and calls into the [`Router`]. The write
//! half lives in a [`ConnectionHandle`] that the registry shares with every
//! other handler once the peer has registered.
//!
//! ```text
//! Unregistered --Connect--> Registered --eof / @Quit / error--> Closed
//! ```
//!
//! Until a `Connect` arrives nothing the peer sends can be attributed, so
//! only `Connect` and `@Quit` are acted upon in `Unregistered`.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{io::AsyncRead, time::timeout};
use tracing::{debug, info, trace};

use crate::{
    control::Control,
    frame::{Frame, SERVER_ID, read_frame},
    registry::{ClientId, ConnectionHandle},
    router::Router,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered(ClientId),
    Closed,
}

/// Whether the read loop keeps going after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct ConnectionHandler {
    router: Router,
    connection: ConnectionHandle,
    state: SessionState,
    idle_timeout: Option<Duration>,
}

impl ConnectionHandler {
    pub fn new(router: Router, connection: ConnectionHandle) -> Self {
        Self {
            router,
            connection,
            state: SessionState::Unregistered,
            idle_timeout: None,
        }
    }

    /// Closes the connection when no frame arrives within `limit`.
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn client_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Registered(id) => Some(id.as_str()),
            _ => None,
        }
    }

    /// Serves the connection until it closes, then releases the registry
    /// entry and shuts the connection down. Cleanup runs on every exit
    /// path, read errors included; the error is returned afterwards.
    pub async fn run<R>(mut self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let outcome = self.serve(reader).await;
        self.close().await;
        outcome
    }

    async fn serve<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        while let Some(frame) = self.next_frame(reader).await? {
            if self.dispatch(frame).await == Flow::Close {
                debug!(peer = ?self.connection.peer(), "peer quit");
                break;
            }
        }
        Ok(())
    }

    async fn next_frame<R>(&self, reader: &mut R) -> Result<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        let Some(limit) = self.idle_timeout else {
            return read_frame(reader).await.context("failed to read frame");
        };

        match timeout(limit, read_frame(reader)).await {
            Ok(frame) => frame.context("failed to read frame"),
            Err(_) => {
                info!(
                    peer = ?self.connection.peer(),
                    client = ?self.client_id(),
                    timeout = ?limit,
                    "closing idle connection"
                );
                Ok(None)
            }
        }
    }

    /// Acts on one decoded frame.
    pub async fn dispatch(&mut self, frame: Frame) -> Flow {
        trace!(
            destination = %frame.destination,
            source = %frame.source,
            payload = %frame.payload,
            "received frame"
        );

        if frame.is_from_server() {
            debug!("ignoring frame with reserved source");
            return Flow::Continue;
        }
        if frame.is_empty() {
            debug!("ignoring empty frame");
            return Flow::Continue;
        }

        let control = Control::classify(&frame.payload);
        match control {
            Control::Connect => self.register(frame.source).await,
            Control::Quit => return Flow::Close,
            Control::List => match self.client_id() {
                Some(id) => {
                    self.router.unicast_list(id).await;
                }
                None => debug!("ignoring roster request before registration"),
            },
            // Only a heartbeat when addressed to the relay; otherwise it is chat.
            Control::Alive if frame.destination == SERVER_ID => {
                trace!(source = %frame.source, "heartbeat")
            }
            Control::Alive | Control::Send | Control::Text => self.route(frame, control).await,
        }
        Flow::Continue
    }

    async fn register(&mut self, id: ClientId) {
        if id.is_empty() {
            debug!("ignoring connect without a source id");
            return;
        }

        let registry = self.router.registry();
        if let SessionState::Registered(previous) = &self.state {
            if *previous != id {
                registry.release(previous, &self.connection).await;
            }
        }

        if let Some(displaced) = registry.add(id.clone(), self.connection.clone()).await {
            if !displaced.same_as(&self.connection) {
                info!(client = %id, "registration replaced an existing connection");
            }
        }
        info!(peer = ?self.connection.peer(), client = %id, "client registered");
        self.state = SessionState::Registered(id);

        self.router.broadcast_list().await;
    }

    async fn route(&self, frame: Frame, control: Control) {
        if self.client_id().is_none() {
            debug!(
                destination = %frame.destination,
                "dropping message from unregistered connection"
            );
            return;
        }

        let explicit = control == Control::Send;
        let known = !frame.destination.is_empty()
            && self.router.registry().contains(&frame.destination).await;
        if !known && !explicit {
            debug!(destination = %frame.destination, "message to unknown destination");
            return;
        }

        self.router
            .forward(&frame.destination, &frame.source, &frame.payload)
            .await;
    }

    async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Registered(id) = state {
            if self.router.registry().release(&id, &self.connection).await {
                info!(peer = ?self.connection.peer(), client = %id, "client removed");
            }
        }

        if let Err(error) = self.connection.close().await {
            debug!(?error, "connection already closed");
        }
    }
}
