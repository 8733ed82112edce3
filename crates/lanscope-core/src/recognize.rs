//! The device recognition engine.
//!
//! [`recognize`] is a pure, total function: given the same observation and
//! rule set it always returns the same classification and never fails.
//! Missing fields skip their stage instead of erroring. Stage precedence is
//! fixed: hardware prefix, then hostname, then service signature, then
//! [`DeviceType::Unknown`].

use std::collections::BTreeSet;

use crate::rules::RuleSet;
use crate::types::{Capabilities, DeviceType, PortObservation, RawObservation};

/// Classify a single observation against the rule set.
pub fn recognize(observation: &RawObservation, rules: &RuleSet) -> DeviceType {
    if let Some(prefix) = hardware_prefix(&observation.hardware_address) {
        if let Some(label) = rules.vendor_for_prefix(&prefix) {
            return DeviceType::from_label(label);
        }
    }

    if let Some(hostname) = observation.hostname.as_deref() {
        if let Some(device_type) = match_hostname(hostname, rules) {
            return device_type;
        }
    }

    if !observation.ports.is_empty() {
        if let Some(device_type) = match_service_signature(&observation.ports, rules) {
            return device_type;
        }
    }

    DeviceType::Unknown
}

/// First three colon-separated octets, upper-cased. Returns `None` for
/// addresses too short to carry a prefix, which skips the stage.
fn hardware_prefix(hardware_address: &str) -> Option<String> {
    let mut octets = hardware_address.splitn(4, ':');
    let (a, b, c) = (octets.next()?, octets.next()?, octets.next()?);
    if a.is_empty() || b.is_empty() || c.is_empty() {
        return None;
    }
    Some(format!("{a}:{b}:{c}").to_uppercase())
}

/// First hostname pattern (in rule order) whose case-insensitive regex
/// matches wins.
fn match_hostname(hostname: &str, rules: &RuleSet) -> Option<DeviceType> {
    rules
        .hostname_patterns
        .iter()
        .find(|(_, regex)| regex.is_match(hostname))
        .map(|(device_type, _)| device_type.clone())
}

/// First signature (in rule order) whose required pairs are *all* satisfied
/// wins. A pair is satisfied by some observed port with the exact port
/// number and a service name containing the substring, case-insensitively.
fn match_service_signature(ports: &[PortObservation], rules: &RuleSet) -> Option<DeviceType> {
    rules
        .service_signatures
        .iter()
        .find(|(_, required)| {
            required.iter().all(|(port, needle)| {
                ports
                    .iter()
                    .any(|p| p.port == *port && p.service_name.to_lowercase().contains(needle))
            })
        })
        .map(|(device_type, _)| device_type.clone())
}

/// Static capability lookup. Only the four canonical categories carry real
/// profiles; vendor labels and `Unknown` fall back to the locked-down
/// unknown profile.
pub fn capabilities_for(device_type: &DeviceType) -> Capabilities {
    match device_type {
        DeviceType::Printer => Capabilities {
            allow_wake_on_lan: true,
            allow_remote_access: true,
            services: services(&["ipp", "http"]),
            icon: "printer".to_string(),
        },
        DeviceType::Router => Capabilities {
            allow_wake_on_lan: false,
            allow_remote_access: true,
            services: services(&["http", "https", "ssh"]),
            icon: "router".to_string(),
        },
        DeviceType::Server => Capabilities {
            allow_wake_on_lan: true,
            allow_remote_access: true,
            services: services(&["ssh", "rdp", "http"]),
            icon: "server".to_string(),
        },
        DeviceType::Workstation => Capabilities {
            allow_wake_on_lan: true,
            allow_remote_access: true,
            services: services(&["rdp", "ssh"]),
            icon: "workstation".to_string(),
        },
        DeviceType::Vendor(_) | DeviceType::Unknown => Capabilities {
            allow_wake_on_lan: false,
            allow_remote_access: false,
            services: BTreeSet::new(),
            icon: "unknown".to_string(),
        },
    }
}

fn services(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}
