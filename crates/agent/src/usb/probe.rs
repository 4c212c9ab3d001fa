//! DFU interface probing
//!
//! Walks the configuration descriptors of a device and turns every DFU
//! alternate setting (interface class 0xFE, subclass 0x01) into a raw
//! interface record.

use common::{DfuInterfaceRecord, InterfaceFlags};
use rusb::{ConfigDescriptor, Device, DeviceDescriptor, DeviceHandle, UsbContext};
use tracing::{debug, trace};

/// Application-specific interface class
const DFU_INTERFACE_CLASS: u8 = 0xfe;
/// DFU subclass of the application-specific class
const DFU_INTERFACE_SUBCLASS: u8 = 0x01;
/// DFU functional descriptor type
const DFU_FUNCTIONAL_DESCRIPTOR: u8 = 0x21;
/// `bInterfaceProtocol` of an interface in DFU mode
const DFU_MODE_PROTOCOL: u8 = 0x02;

/// DFU 1.0, assumed when no functional descriptor can be read
pub const DFU_VERSION_1_0: u16 = 0x0100;
/// DfuSe (ST extension, "DFU 1.1a")
pub const DFUSE_VERSION: u16 = 0x011a;

/// Value used when a serial or interface string descriptor is missing or unreadable
pub const UNKNOWN_STRING: &str = "UNKNOWN";

/// Find the first descriptor of `desc_type` in a concatenated descriptor list
///
/// Returns the descriptor bytes, truncated to the list end if the declared
/// length overruns it.
pub fn find_descriptor(list: &[u8], desc_type: u8) -> Option<&[u8]> {
    let mut pos = 0;
    while pos + 1 < list.len() {
        let len = list[pos] as usize;
        if len == 0 {
            debug!("Invalid descriptor list");
            return None;
        }
        if list[pos + 1] == desc_type {
            let end = (pos + len).min(list.len());
            return Some(&list[pos..end]);
        }
        pos += len;
    }
    None
}

/// `bcdDFUVersion` of a DFU functional descriptor
///
/// Short (7 byte, DFU 1.0 era) or truncated descriptors report DFU 1.0.
pub fn dfu_version(functional: &[u8]) -> u16 {
    if functional.len() >= 9 {
        u16::from_le_bytes([functional[7], functional[8]])
    } else {
        DFU_VERSION_1_0
    }
}

/// Decide whether an alternate setting is in DFU mode
///
/// Besides the standard protocol value, this accounts for devices that
/// report the wrong `bInterfaceProtocol` while in DFU mode.
pub fn is_dfu_mode(
    vendor_id: u16,
    product_id: u16,
    interface_protocol: u8,
    dfu_version: u16,
    num_interfaces: u8,
) -> bool {
    if interface_protocol == DFU_MODE_PROTOCOL {
        return true;
    }
    // DfuSe devices such as the DSO Nano report protocol 0
    if dfu_version == DFUSE_VERSION && interface_protocol == 0 {
        return true;
    }
    // LPC DFU bootloader reports protocol 1 (runtime)
    if vendor_id == 0x1fc9 && product_id == 0x000c && interface_protocol == 1 {
        return true;
    }
    // Old Jabra devices report protocol 0 and expose a single interface in DFU mode
    vendor_id == 0x0b0e && interface_protocol == 0 && num_interfaces == 1
}

/// Bus topology path: `<bus>-<port>[.<port>...]`
///
/// Returns `None` for devices without a port chain (root hubs).
pub fn device_path(bus: u8, ports: &[u8]) -> Option<String> {
    let (first, rest) = ports.split_first()?;
    let mut path = format!("{}-{}", bus, first);
    for port in rest {
        path.push('.');
        path.push_str(&port.to_string());
    }
    Some(path)
}

/// Check if a VID/PID pair is allowed by the filters
///
/// Filter format: `0xVID:0xPID`, with `*` as a wildcard for either side.
/// An empty filter list allows every device.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        matches_id(filter_vid, vid) && matches_id(filter_pid, pid)
    })
}

fn matches_id(pattern: &str, id: u16) -> bool {
    if pattern == "*" {
        return true;
    }
    let hex = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);
    u16::from_str_radix(hex, 16)
        .map(|v| v == id)
        .unwrap_or(false)
}

fn is_dfu_interface(class: u8, subclass: u8) -> bool {
    class == DFU_INTERFACE_CLASS && subclass == DFU_INTERFACE_SUBCLASS
}

/// Look up `bcdDFUVersion` for a configuration
///
/// Returns `None` when the configuration has no DFU interface at all.
fn config_dfu_version(config: &ConfigDescriptor) -> Option<u16> {
    if let Some(functional) = find_descriptor(config.extra(), DFU_FUNCTIONAL_DESCRIPTOR) {
        return Some(dfu_version(functional));
    }

    let mut has_dfu = false;
    for interface in config.interfaces() {
        for alt in interface.descriptors() {
            if !is_dfu_interface(alt.class_code(), alt.sub_class_code()) {
                continue;
            }
            if let Some(functional) = find_descriptor(alt.extra(), DFU_FUNCTIONAL_DESCRIPTOR) {
                return Some(dfu_version(functional));
            }
            has_dfu = true;
        }
    }

    has_dfu.then(|| {
        debug!("Device has DFU interface, but has no DFU functional descriptor");
        DFU_VERSION_1_0
    })
}

fn read_string<T: UsbContext>(handle: &DeviceHandle<T>, index: Option<u8>) -> Option<String> {
    index
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
        .filter(|s| !s.is_empty())
}

/// `value`, or [`UNKNOWN_STRING`] when the descriptor could not be read
///
/// Applies to serials too, so a device without a readable serial is
/// reported with `serial=UNKNOWN` and hardware id `UNKNOWN`.
fn or_unknown(value: Option<String>) -> String {
    value.unwrap_or_else(|| UNKNOWN_STRING.to_string())
}

/// Probe one device for DFU interfaces
///
/// Devices that cannot be opened are skipped: their string descriptors are
/// needed to build a usable record.
pub fn probe_device<T: UsbContext>(device: &Device<T>, filters: &[String]) -> Vec<DfuInterfaceRecord> {
    let mut records = Vec::new();

    let desc: DeviceDescriptor = match device.device_descriptor() {
        Ok(desc) => desc,
        Err(e) => {
            trace!("Skipping device without descriptor: {}", e);
            return records;
        }
    };

    if !check_filter(desc.vendor_id(), desc.product_id(), filters) {
        trace!(
            "Device ignored by filter: vid={:#06x}, pid={:#06x}",
            desc.vendor_id(),
            desc.product_id()
        );
        return records;
    }

    let ports = device.port_numbers().unwrap_or_default();
    let Some(path) = device_path(device.bus_number(), &ports) else {
        return records;
    };

    for cfg_idx in 0..desc.num_configurations() {
        let config = match device.config_descriptor(cfg_idx) {
            Ok(config) => config,
            Err(e) => {
                trace!("No configuration {} on {}: {}", cfg_idx, path, e);
                break;
            }
        };

        let Some(version) = config_dfu_version(&config) else {
            continue;
        };

        let handle = match device.open() {
            Ok(handle) => handle,
            Err(e) => {
                debug!(
                    "Cannot open DFU device {:04x}:{:04x} at {}: {}",
                    desc.vendor_id(),
                    desc.product_id(),
                    path,
                    e
                );
                continue;
            }
        };
        let serial_number = or_unknown(read_string(&handle, desc.serial_number_string_index()));

        for interface in config.interfaces() {
            for alt in interface.descriptors() {
                if !is_dfu_interface(alt.class_code(), alt.sub_class_code()) {
                    continue;
                }

                let dfu_mode = is_dfu_mode(
                    desc.vendor_id(),
                    desc.product_id(),
                    alt.protocol_code(),
                    version,
                    config.num_interfaces(),
                );

                let alt_name = or_unknown(read_string(&handle, alt.description_string_index()));

                let mut flags = InterfaceFlags::empty();
                flags.set(InterfaceFlags::DFU, dfu_mode);

                trace!(
                    "Found {}: [{:04x}:{:04x}] cfg={}, intf={}, alt={}, path=\"{}\", name=\"{}\"",
                    if dfu_mode { "DFU" } else { "Runtime" },
                    desc.vendor_id(),
                    desc.product_id(),
                    config.number(),
                    alt.interface_number(),
                    alt.setting_number(),
                    path,
                    alt_name
                );

                records.push(DfuInterfaceRecord {
                    path: path.clone(),
                    vendor_id: desc.vendor_id(),
                    product_id: desc.product_id(),
                    serial_number: serial_number.clone(),
                    alt_name,
                    flags,
                });
            }
        }
    }

    records
}
