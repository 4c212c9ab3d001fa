//! Protocol message definitions
//!
//! Commands are what the parent process sends; messages are what the agent
//! writes back, either as a direct reply to a command or asynchronously
//! while synchronizing.

use crate::types::{Port, PortRef};
use crate::version::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

/// Command received from the parent process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Handshake carrying the parent's protocol version and user agent
    Hello {
        protocol_version: u32,
        user_agent: String,
    },
    /// Start the discovery in polling mode (ports served through LIST)
    Start,
    /// Stop the discovery, releasing the USB backend
    Stop,
    /// Return the ports currently known (after START)
    List,
    /// Start the discovery in event mode (add/remove pushed as they happen)
    StartSync,
    /// Stop and terminate the agent
    Quit,
}

/// Outcome carried by command replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    pub message: String,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            error: false,
            message: "OK".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }
}

/// Message written to the parent process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "snake_case")]
pub enum Message {
    /// Reply to HELLO
    Hello {
        #[serde(rename = "protocolVersion")]
        protocol_version: u32,
        message: String,
    },
    /// Reply to START
    Start(Reply),
    /// Reply to STOP
    Stop(Reply),
    /// Reply to START_SYNC, also used for errors raised while synchronizing
    StartSync(Reply),
    /// Reply to QUIT
    Quit(Reply),
    /// Reply to LIST
    List { ports: Vec<Port> },
    /// A port appeared
    Add { port: Port },
    /// A port disappeared
    Remove { port: PortRef },
    /// Unknown or malformed command, or command issued out of order
    CommandError(Reply),
}

impl Message {
    /// Successful HELLO reply at the version this agent speaks
    pub fn hello() -> Self {
        Message::Hello {
            protocol_version: PROTOCOL_VERSION,
            message: "OK".to_string(),
        }
    }

    pub fn command_error(message: impl Into<String>) -> Self {
        Message::CommandError(Reply::error(message))
    }

    pub fn add(port: Port) -> Self {
        Message::Add { port }
    }

    pub fn remove(port: &Port) -> Self {
        Message::Remove {
            port: PortRef::from(port),
        }
    }

    /// Whether this message reports a failure
    pub fn is_error(&self) -> bool {
        match self {
            Message::Start(r)
            | Message::Stop(r)
            | Message::StartSync(r)
            | Message::Quit(r)
            | Message::CommandError(r) => r.error,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_ok_has_no_error_field() {
        let json = serde_json::to_string(&Message::Stop(Reply::ok())).unwrap();
        assert_eq!(json, r#"{"eventType":"stop","message":"OK"}"#);
    }

    #[test]
    fn test_reply_error_carries_flag() {
        let json = serde_json::to_string(&Message::command_error("First command must be HELLO"))
            .unwrap();
        assert_eq!(
            json,
            r#"{"eventType":"command_error","error":true,"message":"First command must be HELLO"}"#
        );
    }

    #[test]
    fn test_start_sync_tag() {
        let json = serde_json::to_value(Message::StartSync(Reply::ok())).unwrap();
        assert_eq!(json["eventType"], "start_sync");
    }

    #[test]
    fn test_is_error() {
        assert!(Message::Start(Reply::error("boom")).is_error());
        assert!(!Message::hello().is_error());
        assert!(!Message::List { ports: vec![] }.is_error());
    }
}
