//! Port snapshot builder
//!
//! Turns one enumeration pass into a snapshot: every DFU-mode interface
//! becomes one port descriptor keyed by its bus path. Runtime-mode interfaces
//! are dropped.

use common::DfuInterfaceRecord;
use protocol::{Port, PortProperties};
use std::collections::HashMap;

/// Protocol tag of every port reported by this agent
pub const PROTOCOL_TAG: &str = "dfu";

/// Human readable protocol name
pub const PROTOCOL_LABEL: &str = "USB DFU";

/// All eligible ports visible at one instant, keyed by address
pub type Snapshot = HashMap<String, Port>;

/// Build the port descriptor for one DFU interface
pub fn port_from_record(record: &DfuInterfaceRecord) -> Port {
    let mut properties = PortProperties::new();
    properties.set("vid", format!("{:04X}", record.vendor_id));
    properties.set("pid", format!("{:04X}", record.product_id));
    if !record.serial_number.is_empty() {
        properties.set("serial", record.serial_number.clone());
    }

    Port {
        address: record.path.clone(),
        address_label: record.path.clone(),
        protocol: PROTOCOL_TAG.to_string(),
        protocol_label: PROTOCOL_LABEL.to_string(),
        properties,
        hardware_id: record.serial_number.clone(),
    }
}

/// Build a snapshot from the records of one enumeration pass
pub fn build_snapshot(records: &[DfuInterfaceRecord]) -> Snapshot {
    records
        .iter()
        .filter(|record| record.is_dfu())
        .map(|record| (record.path.clone(), port_from_record(record)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_dfu_record, create_dfu_record_list, create_runtime_record};

    #[test]
    fn test_port_without_serial() {
        let port = port_from_record(&create_dfu_record("/usb1", 0x1234, 0x5678, ""));

        assert_eq!(port.address, "/usb1");
        assert_eq!(port.address_label, "/usb1");
        assert_eq!(port.protocol, "dfu");
        assert_eq!(port.protocol_label, "USB DFU");
        assert_eq!(port.properties.get("vid"), Some("1234"));
        assert_eq!(port.properties.get("pid"), Some("5678"));
        assert!(!port.properties.contains_key("serial"));
        assert_eq!(port.hardware_id, "");
    }

    #[test]
    fn test_port_with_serial() {
        let port = port_from_record(&create_dfu_record("1-2", 0xaaaa, 0x00bb, "SN42"));

        let keys: Vec<&str> = port.properties.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["vid", "pid", "serial"]);
        assert_eq!(port.properties.get("vid"), Some("AAAA"));
        assert_eq!(port.properties.get("pid"), Some("00BB"));
        assert_eq!(port.properties.get("serial"), Some("SN42"));
        assert_eq!(port.hardware_id, "SN42");
    }

    #[test]
    fn test_build_keeps_every_dfu_record() {
        let records = create_dfu_record_list(5);
        let snapshot = build_snapshot(&records);

        assert_eq!(snapshot.len(), 5);
        for record in &records {
            assert!(snapshot.contains_key(&record.path));
        }
    }

    #[test]
    fn test_build_drops_runtime_records() {
        let records: Vec<_> = (0..4)
            .map(|i| create_runtime_record(&format!("1-{}", i), 0x0483, 0x5740))
            .collect();
        assert!(build_snapshot(&records).is_empty());

        let mut mixed = records;
        mixed.push(create_dfu_record("2-1", 0x0483, 0xdf11, "ABC"));
        let snapshot = build_snapshot(&mixed);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("2-1"));
    }

    #[test]
    fn test_shared_serial_distinct_paths() {
        let records = vec![
            create_dfu_record("1-1", 0x0483, 0xdf11, "SAME"),
            create_dfu_record("1-2", 0x0483, 0xdf11, "SAME"),
        ];
        assert_eq!(build_snapshot(&records).len(), 2);
    }
}
