use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{frame::ID_WIDTH, relay::RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP connections from chat clients.
    Relay(RelayArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:65432")]
    pub listen: SocketAddr,

    /// Reject new connections once this many are being served.
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Close connections that send nothing for this many seconds.
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,
}

impl RelayArgs {
    pub fn config(&self) -> RelayConfig {
        RelayConfig {
            max_connections: self.max_connections,
            idle_timeout: self.idle_timeout.map(Duration::from_secs),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Identifier to register under (at most 8 bytes, no whitespace).
    #[arg(long, value_parser = parse_client_id)]
    pub id: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:65432")]
    pub server: SocketAddr,

    /// Seconds between heartbeats; 0 disables them.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub heartbeat: u64,
}

impl ClientArgs {
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat > 0).then(|| Duration::from_secs(self.heartbeat))
    }
}

fn parse_client_id(raw: &str) -> Result<String, String> {
    if raw.is_empty() {
        return Err("id cannot be empty".to_string());
    }
    if raw.len() > ID_WIDTH {
        return Err(format!("id must be at most {ID_WIDTH} bytes"));
    }
    if raw.chars().any(|c| c.is_whitespace() || c == '\0') {
        return Err("id cannot contain whitespace".to_string());
    }
    Ok(raw.to_string())
}
