use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    frame::{Frame, SERVER_ID},
    registry::{ClientId, Registry},
};

const ROSTER_PREFIX: &str = "Online clients: ";

/// Delivers frames to registered connections.
///
/// Delivery is best effort: an unknown destination or a failed write is
/// logged and dropped, and the sender is never told.
#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Sends one frame to `destination`, keeping `source` as given.
    /// Returns whether the frame was written.
    pub async fn forward(&self, destination: &str, source: &str, payload: &str) -> bool {
        let Some(connection) = self.registry.lookup(destination).await else {
            debug!(destination, source, "dropping message for unknown destination");
            return false;
        };

        let frame = Frame::new(destination, source, payload);
        match connection.send(&frame).await {
            Ok(()) => {
                debug!(destination, source, "forwarded message");
                true
            }
            Err(error) => {
                warn!(destination, source, ?error, "failed to forward message");
                false
            }
        }
    }

    /// Sends the current roster to `to_id` only.
    pub async fn unicast_list(&self, to_id: &str) -> bool {
        let snapshot = self.registry.snapshot().await;
        let Some(connection) = snapshot
            .iter()
            .find(|(id, _)| id == to_id)
            .map(|(_, connection)| connection.clone())
        else {
            debug!(client = to_id, "roster requested by unregistered client");
            return false;
        };

        let frame = roster_frame(snapshot.iter().map(|(id, _)| id));
        match connection.send(&frame).await {
            Ok(()) => true,
            Err(error) => {
                warn!(client = to_id, ?error, "failed to send roster");
                false
            }
        }
    }

    /// Sends the same roster frame to every registered connection.
    /// Returns how many connections it reached.
    pub async fn broadcast_list(&self) -> usize {
        let snapshot = self.registry.snapshot().await;
        let frame = roster_frame(snapshot.iter().map(|(id, _)| id));

        let mut delivered = 0;
        for (id, connection) in &snapshot {
            match connection.send(&frame).await {
                Ok(()) => delivered += 1,
                Err(error) => warn!(client = %id, ?error, "failed to broadcast roster"),
            }
        }
        debug!(delivered, total = snapshot.len(), "broadcast roster");
        delivered
    }
}

fn roster_frame<'a>(ids: impl Iterator<Item = &'a ClientId>) -> Frame {
    Frame::new(SERVER_ID, SERVER_ID, roster_text(ids))
}

/// `Online clients: alice, bob`
pub fn roster_text<'a>(ids: impl Iterator<Item = &'a ClientId>) -> String {
    let ids: Vec<&str> = ids.map(String::as_str).collect();
    format!("{ROSTER_PREFIX}{}", ids.join(", "))
}
