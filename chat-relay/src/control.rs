//! Classification of frame payloads the relay interprets itself.

pub const CONNECT: &str = "Connect";
pub const QUIT: &str = "@Quit";
pub const LIST: &str = "@List";
pub const SEND: &str = "@Send";
pub const ALIVE: &str = "Alive";

/// What a payload asks the relay to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// `Connect <id>` registration handshake.
    Connect,
    /// `@Quit` graceful disconnect.
    Quit,
    /// `@List` roster request.
    List,
    /// `@Send ...` explicit routed message.
    Send,
    /// `Alive <id>` heartbeat when sent to the relay; chat otherwise.
    Alive,
    /// Anything else; routed if the destination is known.
    Text,
}

impl Control {
    /// Connect, Send and Alive match on prefix. Quit and List must match
    /// the whole payload.
    pub fn classify(payload: &str) -> Self {
        if payload.starts_with(CONNECT) {
            Control::Connect
        } else if payload == QUIT {
            Control::Quit
        } else if payload == LIST {
            Control::List
        } else if payload.starts_with(ALIVE) {
            Control::Alive
        } else if payload.starts_with(SEND) {
            Control::Send
        } else {
            Control::Text
        }
    }
}

pub fn connect_payload(id: &str) -> String {
    format!("{CONNECT} {id}")
}

pub fn alive_payload(id: &str) -> String {
    format!("{ALIVE} {id}")
}
