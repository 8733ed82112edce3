//! Core domain types for the lanscope network topology.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Observations ──────────────────────────────────────────────────

/// A raw per-host scan result, produced fresh each cycle by the probe
/// layer and discarded after classification and merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    /// IP address the host answered from.
    pub address: IpAddr,
    /// Normalized MAC address (`AA:BB:CC:DD:EE:FF`). The sole identity
    /// key for device deduplication.
    pub hardware_address: String,
    /// Reverse-resolved hostname, if any.
    pub hostname: Option<String>,
    /// When the host answered the discovery sweep.
    pub timestamp: DateTime<Utc>,
    /// Open services found by the per-host probe.
    pub ports: Vec<PortObservation>,
}

/// A single open service observed on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortObservation {
    pub port: u16,
    pub protocol: Protocol,
    pub service_name: String,
    pub version: Option<String>,
}

/// Transport protocol of an observed service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Other(String),
}

impl Protocol {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "tcp" => Self::Tcp,
            "udp" => Self::Udp,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Classification ────────────────────────────────────────────────

/// The classification assigned to an observation.
///
/// The four canonical categories come from hostname and service-signature
/// rules; `Vendor` carries the free-form label produced by hardware-prefix
/// matching, kept as a distinct arm so capability and display logic can
/// branch exhaustively instead of comparing strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Printer,
    Router,
    Server,
    Workstation,
    Vendor(String),
    Unknown,
}

impl DeviceType {
    /// The stable string form used in rule documents and the database.
    pub fn label(&self) -> &str {
        match self {
            Self::Printer => "printer",
            Self::Router => "router",
            Self::Server => "server",
            Self::Workstation => "workstation",
            Self::Vendor(name) => name,
            Self::Unknown => "unknown",
        }
    }

    /// Parse a label back into a type. Category names (case-insensitive)
    /// map to their category; anything else is a vendor label.
    pub fn from_label(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "printer" => Self::Printer,
            "router" => Self::Router,
            "server" => Self::Server,
            "workstation" => Self::Workstation,
            "unknown" => Self::Unknown,
            _ => Self::Vendor(label.to_string()),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The capability profile derived from a device type. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub allow_wake_on_lan: bool,
    pub allow_remote_access: bool,
    pub services: BTreeSet<String>,
    pub icon: String,
}

/// An observation paired with its classification, ready for reconciliation.
#[derive(Debug, Clone)]
pub struct ClassifiedObservation {
    pub observation: RawObservation,
    pub device_type: DeviceType,
}

// ── Persisted records ─────────────────────────────────────────────

/// A device row in the topology store.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: i64,
    pub hardware_address: String,
    pub address: String,
    pub hostname: Option<String>,
    pub device_type: DeviceType,
    pub location_id: Option<i64>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A service row in the topology store, unique per
/// `(device_id, port, protocol)`.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub device_id: i64,
    pub port: u16,
    pub protocol: Protocol,
    pub service_name: String,
    pub is_active: bool,
    pub last_checked: DateTime<Utc>,
}
