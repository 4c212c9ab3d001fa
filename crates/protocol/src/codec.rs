//! Line codec for the discovery protocol
//!
//! Commands are plain text, one per line:
//! ```text
//! HELLO 1 "arduino-cli 1.0.0"
//! START_SYNC
//! ```
//! Replies and events are single-line JSON objects terminated by `\n`.

use crate::error::{ProtocolError, Result};
use crate::messages::{Command, Message};

#[cfg(feature = "async")]
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Parse one command line
///
/// Leading and trailing whitespace is ignored. Keywords are case-sensitive.
pub fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim();
    let (keyword, args) = match line.split_once(char::is_whitespace) {
        Some((keyword, args)) => (keyword, args.trim()),
        None => (line, ""),
    };

    match keyword {
        "HELLO" => parse_hello(args),
        "START" => Ok(Command::Start),
        "STOP" => Ok(Command::Stop),
        "LIST" => Ok(Command::List),
        "START_SYNC" => Ok(Command::StartSync),
        "QUIT" => Ok(Command::Quit),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

/// Parse `<version> "<user agent>"`
fn parse_hello(args: &str) -> Result<Command> {
    let (version, user_agent) = args.split_once(' ').ok_or(ProtocolError::InvalidHello)?;

    let protocol_version: u32 = version.parse().map_err(|_| ProtocolError::InvalidHello)?;

    let user_agent = user_agent
        .trim()
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or(ProtocolError::InvalidHello)?;

    if user_agent.is_empty() || user_agent.contains('"') {
        return Err(ProtocolError::InvalidHello);
    }

    Ok(Command::Hello {
        protocol_version,
        user_agent: user_agent.to_string(),
    })
}

/// Encode a message as a single JSON line (without the trailing newline)
pub fn encode_message(message: &Message) -> Result<String> {
    serde_json::to_string(message).map_err(ProtocolError::from)
}

/// Decode a message from a JSON line
pub fn decode_message(line: &str) -> Result<Message> {
    serde_json::from_str(line.trim()).map_err(ProtocolError::from)
}

/// Write a message followed by a newline and flush
///
/// The parent reads line by line, so every message is flushed immediately.
#[cfg(feature = "async")]
pub async fn write_message_async<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = encode_message(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
