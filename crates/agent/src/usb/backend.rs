//! libusb backend
//!
//! Owns the libusb context used for enumeration and hotplug. The context is
//! acquired when synchronization starts and released when it stops; each
//! backend instance has its own context, so several engines never share
//! native state.

use crate::usb::probe::probe_device;
use common::{DeviceEnumerator, DfuInterfaceRecord, Error, Result};
use rusb::{Context, UsbContext};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// [`DeviceEnumerator`] backed by a libusb context
pub struct LibusbBackend {
    /// Open context, `None` while closed
    context: Mutex<Option<Context>>,
    /// Device filters (VID:PID patterns)
    filters: Vec<String>,
}

impl LibusbBackend {
    pub fn new(filters: Vec<String>) -> Self {
        Self {
            context: Mutex::new(None),
            filters,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Context>> {
        self.context.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle on the open context
    ///
    /// The returned context is reference counted: holders keep libusb alive
    /// even after the backend is closed, until they drop it.
    pub fn context(&self) -> Option<Context> {
        self.slot().clone()
    }

    pub fn is_open(&self) -> bool {
        self.slot().is_some()
    }
}

impl DeviceEnumerator for LibusbBackend {
    fn open(&self) -> Result<()> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Ok(());
        }

        let context = Context::new().map_err(|e| Error::BackendInit(e.to_string()))?;
        *slot = Some(context);
        info!("libusb context opened");
        Ok(())
    }

    fn close(&self) {
        if self.slot().take().is_some() {
            info!("libusb context released");
        }
    }

    fn enumerate(&self) -> Result<Vec<DfuInterfaceRecord>> {
        let context = self.context().ok_or(Error::BackendNotOpen)?;
        let devices = context.devices().map_err(|e| Error::Usb(e.to_string()))?;

        let records: Vec<DfuInterfaceRecord> = devices
            .iter()
            .flat_map(|device| probe_device(&device, &self.filters))
            .collect();

        debug!(
            "Enumerated {} DFU interfaces on {} devices",
            records.len(),
            devices.len()
        );
        Ok(records)
    }
}
