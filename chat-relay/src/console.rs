//! Parsing for the chat client's console input.
//!
//! Commands are case-insensitive:
//! - `@send <id> <text...>` sends `text` to client `id`
//! - `@list` asks the relay for the roster
//! - `@quit` leaves the chat

use anyhow::{Result, anyhow};

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Send { to: String, text: String },
    List,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("empty command"));
        }

        let mut parts = trimmed.split_whitespace();
        let command = parts.next().unwrap_or_default().to_lowercase();
        match command.as_str() {
            "@quit" => Ok(ConsoleCommand::Quit),
            "@list" => Ok(ConsoleCommand::List),
            "@send" => {
                let to = parts
                    .next()
                    .ok_or_else(|| anyhow!("usage: @send <id> <text>"))?
                    .to_string();
                let text = parts.collect::<Vec<_>>().join(" ");
                Ok(ConsoleCommand::Send { to, text })
            }
            _ => Err(anyhow!("Unknown command.")),
        }
    }
}
