//! The probe layer: discovery sweep and per-host service probing.
//!
//! [`ProbeLayer`] is the seam the monitor loop drives; [`NmapProbe`] is the
//! production implementation, executing nmap as a child process via
//! `tokio::process::Command` and deserializing its `-oX -` output.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use lanscope_core::types::{PortObservation, Protocol, RawObservation};

use crate::error::{Result, ScanError};
use crate::nmap_xml::{self, ScanHost, ScanRun};

/// The two blocking, individually fallible probe calls the monitor loop
/// consumes. Implementations must be shareable across concurrent probes.
#[async_trait]
pub trait ProbeLayer: Send + Sync {
    /// Address-resolution sweep over a network range. Returns one raw
    /// observation per responding host (address, MAC, hostname, timestamp;
    /// ports are filled in by [`Self::probe_services`]).
    async fn discover(&self, range: &str) -> Result<Vec<RawObservation>>;

    /// Application-service probe against a single discovered host.
    async fn probe_services(&self, address: IpAddr) -> Result<Vec<PortObservation>>;
}

/// Wrapper around the nmap binary.
pub struct NmapProbe {
    nmap_path: String,
    host_timeout_secs: u64,
}

impl NmapProbe {
    pub fn new(nmap_path: &str, host_timeout_secs: u64) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
            host_timeout_secs,
        }
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| ScanError::NmapNotFound {
                path: self.nmap_path.clone(),
            })?;

        String::from_utf8(output.stdout).map_err(|e| ScanError::XmlParse(e.to_string()))
    }

    async fn run_nmap(&self, flags: &[&str], target: &str) -> Result<ScanRun> {
        let output = Command::new(&self.nmap_path)
            .args(flags)
            .arg("-oX")
            .arg("-")
            .arg("--noninteractive")
            .arg(target)
            .output()
            .await
            .map_err(|e| ScanError::NmapNotFound {
                path: format!("{}: {e}", self.nmap_path),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(ScanError::NmapFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        nmap_xml::parse_scan_xml(&output.stdout)
    }
}

#[async_trait]
impl ProbeLayer for NmapProbe {
    async fn discover(&self, range: &str) -> Result<Vec<RawObservation>> {
        let run = self.run_nmap(&["-sn"], range).await?;
        let now = Utc::now();

        let mut observations = Vec::new();
        for host in run.hosts.iter().filter(|h| h.is_up()) {
            let Some(address) = host.ipv4().and_then(|a| a.parse::<IpAddr>().ok()) else {
                continue;
            };
            // The MAC is the persistence identity; a host without one
            // cannot be reconciled.
            let Some(hardware_address) = host.mac().and_then(normalize_mac) else {
                tracing::debug!(address = %address, "Host answered without a usable MAC, skipping");
                continue;
            };
            observations.push(RawObservation {
                address,
                hardware_address,
                hostname: host.hostname().map(String::from),
                timestamp: now,
                ports: Vec::new(),
            });
        }

        tracing::debug!(range = %range, hosts = observations.len(), "Discovery sweep complete");
        Ok(observations)
    }

    async fn probe_services(&self, address: IpAddr) -> Result<Vec<PortObservation>> {
        let host_timeout = format!("{}s", self.host_timeout_secs);
        let flags = ["-sS", "-sV", "-F", "--host-timeout", host_timeout.as_str()];
        let run = self.run_nmap(&flags, &address.to_string()).await?;
        Ok(run.hosts.iter().flat_map(open_ports).collect())
    }
}

fn open_ports(host: &ScanHost) -> Vec<PortObservation> {
    let Some(ports) = &host.ports else {
        return Vec::new();
    };
    ports
        .ports
        .iter()
        .filter(|p| p.is_open())
        .map(|p| PortObservation {
            port: p.port_id,
            protocol: Protocol::parse(&p.protocol),
            service_name: p
                .service
                .as_ref()
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            version: p.service.as_ref().and_then(|s| s.version.clone()),
        })
        .collect()
}

/// Normalize a MAC address to `AA:BB:CC:DD:EE:FF`. Accepts colon, dash,
/// or dot separators as well as a raw 12-digit hex string.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let clean = raw.replace(['-', '.'], ":");
    let parts: Vec<&str> = clean.split(':').collect();

    if parts.len() == 6 && parts.iter().all(|p| p.len() == 2) {
        return Some(clean.to_uppercase());
    }

    if clean.len() == 12 && clean.chars().all(|c| c.is_ascii_hexdigit()) {
        let octets: Vec<&str> = (0..6).map(|i| &clean[i * 2..i * 2 + 2]).collect();
        return Some(octets.join(":").to_uppercase());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmap_xml::parse_scan_xml;

    #[test]
    fn normalize_mac_formats() {
        assert_eq!(
            normalize_mac("aa:bb:cc:dd:ee:ff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(
            normalize_mac("AA-BB-CC-DD-EE-FF").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(
            normalize_mac("aabbccddeeff").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(normalize_mac("aa:bb:cc"), None);
        assert_eq!(normalize_mac("not-a-mac"), None);
        assert_eq!(normalize_mac(""), None);
    }

    #[test]
    fn open_ports_skips_closed_and_filtered() {
        let xml = r#"<?xml version="1.0"?>
<nmaprun>
  <host>
    <status state="up"/>
    <address addr="192.168.1.23" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open"/>
        <service name="ssh" version="9.6"/>
      </port>
      <port protocol="udp" portid="53">
        <state state="open"/>
        <service name="domain"/>
      </port>
      <port protocol="tcp" portid="445">
        <state state="filtered"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;
        let run = parse_scan_xml(xml.as_bytes()).unwrap();
        let ports = open_ports(&run.hosts[0]);

        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].port, 22);
        assert_eq!(ports[0].protocol, Protocol::Tcp);
        assert_eq!(ports[0].service_name, "ssh");
        assert_eq!(ports[0].version.as_deref(), Some("9.6"));
        assert_eq!(ports[1].protocol, Protocol::Udp);
        assert!(ports[1].version.is_none());
    }

    #[test]
    fn open_ports_without_port_element_is_empty() {
        let xml = r#"<?xml version="1.0"?>
<nmaprun>
  <host>
    <status state="up"/>
    <address addr="192.168.1.23" addrtype="ipv4"/>
  </host>
</nmaprun>"#;
        let run = parse_scan_xml(xml.as_bytes()).unwrap();
        assert!(open_ports(&run.hosts[0]).is_empty());
    }
}
