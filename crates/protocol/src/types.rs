//! Port type definitions
//!
//! A port is the unit the discovery reports to its parent: one upload target
//! identified by its address, with a protocol tag and a set of display
//! properties used by the parent to match boards.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Ordered key/value properties attached to a port
///
/// Keys keep their insertion order on the wire. Setting an existing key
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortProperties {
    entries: Vec<(String, String)>,
}

impl PortProperties {
    /// Create an empty property set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, keeping the original position if the key exists
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Value for `key`, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PortProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = PortProperties::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

impl Serialize for PortProperties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PortProperties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PropertiesVisitor;

        impl<'de> Visitor<'de> for PropertiesVisitor {
            type Value = PortProperties;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string properties")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut props = PortProperties::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    props.set(k, v);
                }
                Ok(props)
            }
        }

        deserializer.deserialize_map(PropertiesVisitor)
    }
}

/// Port descriptor reported to the parent process
///
/// `address` is the unique identity of the port within one snapshot; every
/// other field is display data and does not take part in change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    /// Unique address (bus topology path for USB ports)
    pub address: String,
    /// Human readable address
    #[serde(rename = "label", default)]
    pub address_label: String,
    /// Protocol tag, e.g. `dfu`
    pub protocol: String,
    /// Human readable protocol name
    #[serde(default)]
    pub protocol_label: String,
    /// Board identification properties
    #[serde(default)]
    pub properties: PortProperties,
    /// Hardware identifier (serial number when known)
    #[serde(rename = "hardwareId", default, skip_serializing_if = "String::is_empty")]
    pub hardware_id: String,
}

/// Reduced port form carried by `remove` events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    pub address: String,
    pub protocol: String,
}

impl From<&Port> for PortRef {
    fn from(port: &Port) -> Self {
        Self {
            address: port.address.clone(),
            protocol: port.protocol.clone(),
        }
    }
}
