//! libusb hotplug bindings for the change sources
//!
//! [`LibusbHotplug`] feeds the native hotplug source: each session registers
//! a callback on the backend's context and drives `handle_events` from the
//! worker thread. [`LibusbNotifier`] subscribes the same callbacks as a
//! notification stream for the debounced source.

use crate::sync::source::{CancellationHandle, HotplugBackend, HotplugProvider, Notify, NotificationSubscriber};
use crate::usb::backend::LibusbBackend;
use common::{Error, Result};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Hotplug callback handler
///
/// Forwards device arrival and departure to a plain callback; the scan
/// itself happens outside libusb's event handling.
struct HotplugCallback {
    on_change: Arc<dyn Fn() + Send + Sync>,
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        (self.on_change)();
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        (self.on_change)();
    }
}

/// Register a hotplug callback on `context`
///
/// Platforms without hotplug support fail here with a registration error.
fn register_callback(
    context: &Context,
    on_change: Arc<dyn Fn() + Send + Sync>,
) -> Result<Registration<Context>> {
    HotplugBuilder::new()
        .enumerate(false)
        .register(context, Box::new(HotplugCallback { on_change }))
        .map_err(|e| Error::HotplugRegistration(e.to_string()))
}

/// Run one bounded `handle_events` call
fn handle_events(context: &Context, timeout: Duration) -> Result<()> {
    match context.handle_events(Some(timeout)) {
        Ok(()) => Ok(()),
        Err(rusb::Error::Interrupted) => {
            debug!("USB event handling interrupted");
            Ok(())
        }
        Err(e) => Err(Error::Usb(e.to_string())),
    }
}

/// [`HotplugProvider`] on the shared libusb backend
pub struct LibusbHotplug {
    backend: Arc<LibusbBackend>,
}

impl LibusbHotplug {
    pub fn new(backend: Arc<LibusbBackend>) -> Self {
        Self { backend }
    }
}

impl HotplugProvider for LibusbHotplug {
    fn connect(&self) -> Result<Box<dyn HotplugBackend>> {
        let context = self.backend.context().ok_or(Error::BackendNotOpen)?;
        Ok(Box::new(LibusbHotplugSession {
            context,
            registration: None,
            pending: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// One hotplug registration plus its "event occurred" flag
struct LibusbHotplugSession {
    context: Context,
    registration: Option<Registration<Context>>,
    pending: Arc<AtomicBool>,
}

impl HotplugBackend for LibusbHotplugSession {
    fn register(&mut self) -> Result<()> {
        let pending = Arc::clone(&self.pending);
        let registration = register_callback(
            &self.context,
            Arc::new(move || pending.store(true, Ordering::SeqCst)),
        )?;
        self.registration = Some(registration);
        debug!("Hot-plug callbacks registered");
        Ok(())
    }

    fn wait_for_events(&mut self, timeout: Duration) -> Result<bool> {
        handle_events(&self.context, timeout)?;
        Ok(self.pending.swap(false, Ordering::SeqCst))
    }

    fn deregister(&mut self) {
        // Dropping the registration removes the callback from libusb
        if self.registration.take().is_some() {
            debug!("Hot-plug callbacks deregistered");
        }
    }
}

/// [`NotificationSubscriber`] delivering libusb hotplug callbacks as notifications
pub struct LibusbNotifier {
    backend: Arc<LibusbBackend>,
    event_timeout: Duration,
}

impl LibusbNotifier {
    pub fn new(backend: Arc<LibusbBackend>, event_timeout: Duration) -> Self {
        Self {
            backend,
            event_timeout,
        }
    }
}

impl NotificationSubscriber for LibusbNotifier {
    fn subscribe(&self, cancel: &CancellationHandle, notify: Notify) -> Result<()> {
        let context = self.backend.context().ok_or(Error::BackendNotOpen)?;
        let _registration = register_callback(&context, notify)
            .map_err(|e| Error::NotificationStream(e.to_string()))?;

        debug!("Device notifications subscribed");

        while !cancel.is_cancelled() {
            if let Err(e) = handle_events(&context, self.event_timeout) {
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(self.event_timeout);
            }
        }

        Ok(())
    }
}
