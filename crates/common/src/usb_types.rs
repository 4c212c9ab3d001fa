//! USB type abstractions shared by the enumerator and the sync engine

use bitflags::bitflags;

bitflags! {
    /// Capability flags of a probed DFU interface
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
    pub struct InterfaceFlags: u32 {
        /// Interface runs in DFU mode (as opposed to the runtime DFU interface
        /// exposed by a device running its application firmware)
        const DFU = 0x0001;
    }
}

/// Raw DFU interface record produced by one enumeration pass
///
/// Records are created fresh on every enumeration and never cached by the
/// enumerator itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuInterfaceRecord {
    /// Bus topology path, e.g. `1-2.4`; stable identity of the port
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Serial number string, empty when the device reports none
    pub serial_number: String,
    /// Alternate setting name (interface string descriptor)
    pub alt_name: String,
    pub flags: InterfaceFlags,
}

impl DfuInterfaceRecord {
    /// Whether this interface is in DFU mode
    pub fn is_dfu(&self) -> bool {
        self.flags.contains(InterfaceFlags::DFU)
    }
}

/// Source of DFU interface records
///
/// Owns the lifecycle of the native USB backend. `enumerate` is called on
/// every scan and must be cheap to call repeatedly.
pub trait DeviceEnumerator: Send + Sync {
    /// Open the USB backend. Opening an already open backend is a no-op.
    fn open(&self) -> crate::Result<()>;

    /// Release the USB backend. Always succeeds and is idempotent.
    fn close(&self);

    /// Rescan the bus and return every DFU-capable interface currently attached
    ///
    /// Fails with [`crate::Error::BackendNotOpen`] when the backend is closed.
    fn enumerate(&self) -> crate::Result<Vec<DfuInterfaceRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_interface_is_not_dfu() {
        let record = DfuInterfaceRecord {
            path: "1-1".to_string(),
            vendor_id: 0x1234,
            product_id: 0x5678,
            serial_number: String::new(),
            alt_name: "UNKNOWN".to_string(),
            flags: InterfaceFlags::empty(),
        };
        assert!(!record.is_dfu());

        let record = DfuInterfaceRecord {
            flags: InterfaceFlags::DFU,
            ..record
        };
        assert!(record.is_dfu());
    }
}
