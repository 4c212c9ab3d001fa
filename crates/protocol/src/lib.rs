//! Pluggable-discovery protocol library for dfu-discovery
//!
//! This crate defines the line-oriented protocol spoken between the discovery
//! agent and its parent process: commands arrive one per line on stdin, and
//! replies and events leave as one JSON object per line on stdout.
//!
//! # Example
//!
//! ```
//! use protocol::{Command, Message, encode_message, parse_command};
//!
//! let command = parse_command(r#"HELLO 1 "arduino-cli 1.0.0""#).unwrap();
//! assert_eq!(
//!     command,
//!     Command::Hello {
//!         protocol_version: 1,
//!         user_agent: "arduino-cli 1.0.0".to_string(),
//!     }
//! );
//!
//! let line = encode_message(&Message::hello()).unwrap();
//! assert_eq!(line, r#"{"eventType":"hello","protocolVersion":1,"message":"OK"}"#);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{decode_message, encode_message, parse_command};

#[cfg(feature = "async")]
pub use codec::write_message_async;
pub use error::{ProtocolError, Result};
pub use messages::{Command, Message, Reply};
pub use types::{Port, PortProperties, PortRef};
pub use version::PROTOCOL_VERSION;
