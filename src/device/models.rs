use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use super::{DeviceError, Result};

/// Integration identifier used in device identifiers
pub const DOMAIN: &str = "atc_mithermometer";

/// Sibling integration that usually owns the sensor's device record
pub const BTHOME_DOMAIN: &str = "bthome";

/// Connection type key for Bluetooth addresses
pub const CONNECTION_BLUETOOTH: &str = "bluetooth";

pub const ATC_NAME_PREFIXES: &[&str] = &["ATC_", "LYWSD03MMC"];

/// Bluetooth device address, always rendered as `AA:BB:CC:DD:EE:FF`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Accepts colon, dash, dot or no separators, in any case
    pub fn parse(input: &str) -> Result<Self> {
        let cleaned: String = input
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();

        if cleaned.len() != 12 {
            return Err(DeviceError::InvalidMacLength(input.to_string()));
        }
        if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DeviceError::InvalidMacCharacters(input.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&cleaned[i * 2..i * 2 + 2], 16)
                .map_err(|_| DeviceError::InvalidMacCharacters(input.to_string()))?;
        }
        Ok(Self(octets))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Last two octets, e.g. `34:56`, used in default device names
    pub fn short_suffix(&self) -> String {
        let full = self.to_string();
        full[full.len() - 5..].to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

impl FromStr for MacAddress {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MacAddress::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Normalize a MAC address string to uppercase colon-separated form
pub fn normalize_mac(input: &str) -> Result<String> {
    MacAddress::parse(input).map(|mac| mac.to_string())
}

/// Whether an advertised device is an ATC MiThermometer
pub fn is_atc_device(name: Option<&str>, service_uuids: &[String]) -> bool {
    if let Some(name) = name {
        if ATC_NAME_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            return true;
        }
    }

    let environmental = crate::ble::uuids::ENVIRONMENTAL_SENSING_SERVICE.to_string();
    service_uuids
        .iter()
        .any(|uuid| uuid.eq_ignore_ascii_case(&environmental))
}

/// Device record as published to the host, possibly shared with a sibling integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifiers: BTreeSet<(String, String)>,
    pub connections: BTreeSet<(String, String)>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

impl DeviceInfo {
    /// Link onto the sibling record when there is one, otherwise describe a
    /// standalone device.
    pub fn build(mac: &MacAddress, sibling: Option<&DeviceRecord>) -> Self {
        let own_identifier = (DOMAIN.to_string(), mac.to_string());

        match sibling {
            Some(record) => {
                let mut identifiers = record.identifiers.clone();
                identifiers.insert(own_identifier);
                Self {
                    identifiers,
                    connections: record.connections.clone(),
                    name: None,
                    manufacturer: None,
                    model: None,
                }
            }
            None => Self {
                identifiers: BTreeSet::from([own_identifier]),
                connections: BTreeSet::from([(CONNECTION_BLUETOOTH.to_string(), mac.to_string())]),
                name: Some(format!("ATC MiThermometer {}", mac.short_suffix())),
                manufacturer: Some("Custom".to_string()),
                model: Some("ATC MiThermometer".to_string()),
            },
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.name.is_some()
    }
}

/// A device entry held by the device directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub name: Option<String>,
    pub identifiers: BTreeSet<(String, String)>,
    pub connections: BTreeSet<(String, String)>,
    /// Integrations (config owners) attached to this record
    pub owners: BTreeSet<String>,
}

impl DeviceRecord {
    pub fn bluetooth_address(&self) -> Option<MacAddress> {
        self.connections
            .iter()
            .find(|(kind, _)| kind == CONNECTION_BLUETOOTH)
            .and_then(|(_, addr)| MacAddress::parse(addr).ok())
    }
}
