//! Fixed-frame text chat relay.
//!
//! Clients connect over TCP, register under a short id and exchange
//! messages that the relay routes by that id. Every message is one
//! 256-byte frame: an 8-byte destination, an 8-byte source and a NUL padded
//! payload.
//!
//! - [`frame`] encodes and decodes frames and reads/writes them on streams.
//! - [`control`] recognises the payloads the relay acts on itself.
//! - [`registry`] maps client ids to live connections behind one lock.
//! - [`router`] forwards frames and sends the client roster.
//! - [`handler`] runs the per-connection state machine.
//! - [`relay`] accepts connections and spawns a handler task for each.
//! - [`client`], [`console`] and [`cli`] make up the terminal front end.

pub mod cli;
pub mod client;
pub mod console;
pub mod control;
pub mod frame;
pub mod handler;
pub mod registry;
pub mod relay;
pub mod router;
