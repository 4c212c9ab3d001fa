//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The native USB subsystem could not be initialized
    #[error("can't open libusb: {0}")]
    BackendInit(String),

    /// Enumeration was requested while the USB backend is closed
    #[error("USB backend not open")]
    BackendNotOpen,

    #[error("USB error: {0}")]
    Usb(String),

    /// Native hotplug callback registration failed
    #[error("hotplug registration failed: {0}")]
    HotplugRegistration(String),

    /// Device-change notification subscription failed
    #[error("device notification error: {0}")]
    NotificationStream(String),

    /// No async runtime available to host a background task
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
