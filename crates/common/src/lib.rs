//! Common utilities for dfu-discovery
//!
//! This crate provides functionality shared by the agent and its tests:
//! the error type, logging setup, the raw USB interface records produced by
//! device enumeration, the event sink abstraction with its channel bridge,
//! and test utilities.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use channel::{ChannelSink, EventReceiver, EventSink, SyncEvent, create_event_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{DeviceEnumerator, DfuInterfaceRecord, InterfaceFlags};
