//! Configuration for the lanscope-scan daemon.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::Deserialize;

use crate::error::{Result, ScanError};

/// Top-level scan configuration.
///
/// Loaded from the `[scan]` section of `lanscope.toml` or `LANSCOPE__`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Network range to sweep (CIDR, e.g. "192.168.1.0/24").
    #[serde(default = "default_network_range")]
    pub network_range: String,

    /// Path to the nmap binary.
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Path to the SQLite topology database.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to a recognition rule file; the built-in rules apply when unset.
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Seconds between cycles after a successful cycle.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Seconds before retrying after a failed cycle.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Upper bound on the discovery sweep.
    #[serde(default = "default_discover_timeout")]
    pub discover_timeout_secs: u64,

    /// Per-host service probe timeout.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Maximum concurrent service probes per cycle.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_probes: usize,

    /// When set, devices unseen for this long are marked inactive during
    /// reconciliation. Unset (the default) disables the sweep.
    #[serde(default)]
    pub stale_after_secs: Option<u64>,

    /// Optional location name attached to discovered devices.
    #[serde(default)]
    pub location: Option<String>,
}

impl ScanConfig {
    /// Validate fields that cannot be checked by deserialization alone.
    pub fn validate(&self) -> Result<()> {
        if self.network_range.parse::<IpNet>().is_err()
            && self.network_range.parse::<IpAddr>().is_err()
        {
            return Err(ScanError::Config(format!(
                "invalid network range: {}",
                self.network_range
            )));
        }
        if self.max_concurrent_probes == 0 {
            return Err(ScanError::Config(
                "max_concurrent_probes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_network_range() -> String {
    "192.168.1.0/24".to_string()
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_db_path() -> String {
    "lanscope.db".to_string()
}

fn default_scan_interval() -> u64 {
    300
}

fn default_retry_backoff() -> u64 {
    60
}

fn default_discover_timeout() -> u64 {
    120
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_max_concurrent() -> usize {
    8
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            network_range: default_network_range(),
            nmap_path: default_nmap_path(),
            db_path: default_db_path(),
            rules_path: None,
            scan_interval_secs: default_scan_interval(),
            retry_backoff_secs: default_retry_backoff(),
            discover_timeout_secs: default_discover_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            max_concurrent_probes: default_max_concurrent(),
            stale_after_secs: None,
            location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ScanConfig::default();
        assert_eq!(config.network_range, "192.168.1.0/24");
        assert_eq!(config.nmap_path, "nmap");
        assert_eq!(config.scan_interval_secs, 300);
        assert_eq!(config.retry_backoff_secs, 60);
        assert_eq!(config.max_concurrent_probes, 8);
        assert!(config.stale_after_secs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cidr_and_bare_address_ranges_validate() {
        let mut config = ScanConfig::default();
        config.network_range = "10.0.0.0/16".to_string();
        assert!(config.validate().is_ok());
        config.network_range = "10.0.0.1".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_range_fails_validation() {
        let mut config = ScanConfig::default();
        config.network_range = "not-a-network".to_string();
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));
    }

    #[test]
    fn zero_concurrency_fails_validation() {
        let mut config = ScanConfig::default();
        config.max_concurrent_probes = 0;
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));
    }
}
