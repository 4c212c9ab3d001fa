//! USB subsystem integration
//!
//! - `backend`: libusb context lifecycle and DFU interface enumeration
//! - `probe`: descriptor inspection for a single device
//! - `hotplug`: libusb hotplug bindings for the change sources

pub mod backend;
pub mod hotplug;
pub mod probe;

pub use backend::LibusbBackend;
pub use hotplug::{LibusbHotplug, LibusbNotifier};
