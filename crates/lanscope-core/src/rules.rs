//! Recognition rule set: document format, compilation, and built-in defaults.
//!
//! Rules are loaded once at startup from a JSON document and compiled into
//! an immutable [`RuleSet`]. Hostname patterns and service signatures are
//! explicit ordered lists so matching precedence is stable; an invalid
//! regex fails the load rather than being skipped.

use std::collections::HashMap;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::types::DeviceType;

/// The on-disk rule document.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDocument {
    /// First-three-octet MAC prefix to vendor label.
    #[serde(default)]
    pub mac_prefixes: HashMap<String, String>,
    /// Ordered hostname rules; the first matching pattern wins.
    #[serde(default)]
    pub hostname_patterns: Vec<HostnameRule>,
    /// Ordered service signatures; the first fully satisfied one wins.
    #[serde(default)]
    pub service_patterns: Vec<ServiceRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostnameRule {
    pub device_type: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRule {
    pub device_type: String,
    /// Every listed pair must be present for the rule to match.
    pub services: Vec<ServicePattern>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicePattern {
    pub port: u16,
    /// Case-insensitive substring of the observed service name.
    pub service: String,
}

/// A compiled, immutable rule set. Read-only after load and freely
/// shareable across concurrent probes.
#[derive(Debug)]
pub struct RuleSet {
    pub(crate) mac_prefixes: HashMap<String, String>,
    pub(crate) hostname_patterns: Vec<(DeviceType, Regex)>,
    pub(crate) service_signatures: Vec<(DeviceType, Vec<(u16, String)>)>,
}

impl RuleSet {
    /// Load and compile a rule document from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::RuleFileRead {
            path: path.display().to_string(),
            source,
        })?;
        let doc: RuleDocument = serde_json::from_str(&raw)?;
        Self::compile(doc)
    }

    /// Compile a parsed document, validating every regex.
    pub fn compile(doc: RuleDocument) -> Result<Self> {
        let mac_prefixes = doc
            .mac_prefixes
            .into_iter()
            .map(|(prefix, label)| (prefix.to_uppercase(), label))
            .collect();

        let mut hostname_patterns = Vec::with_capacity(doc.hostname_patterns.len());
        for rule in doc.hostname_patterns {
            let regex = RegexBuilder::new(&rule.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| CoreError::InvalidPattern {
                    device_type: rule.device_type.clone(),
                    pattern: rule.pattern.clone(),
                    source,
                })?;
            hostname_patterns.push((DeviceType::from_label(&rule.device_type), regex));
        }

        let service_signatures = doc
            .service_patterns
            .into_iter()
            .map(|rule| {
                let required = rule
                    .services
                    .into_iter()
                    .map(|p| (p.port, p.service.to_lowercase()))
                    .collect();
                (DeviceType::from_label(&rule.device_type), required)
            })
            .collect();

        Ok(Self {
            mac_prefixes,
            hostname_patterns,
            service_signatures,
        })
    }

    /// The built-in rule set, used when no rule file is configured.
    pub fn builtin() -> Self {
        Self::compile(builtin_document()).expect("built-in rules are valid")
    }

    /// Vendor label for an upper-cased three-octet prefix, if mapped.
    pub fn vendor_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.mac_prefixes.get(prefix).map(String::as_str)
    }
}

/// Default rules: a handful of well-known vendor prefixes plus the
/// category heuristics for common LAN devices.
pub fn builtin_document() -> RuleDocument {
    let mac_prefixes = [
        ("00:00:0C", "Cisco"),
        ("00:1A:A0", "Dell"),
        ("00:14:22", "Dell"),
        ("00:50:56", "VMware"),
        ("00:05:69", "VMware"),
        ("00:1C:42", "Parallels"),
    ]
    .into_iter()
    .map(|(p, v)| (p.to_string(), v.to_string()))
    .collect();

    let hostname_patterns = [
        ("printer", r".*printer.*|.*print.*"),
        ("router", r".*router.*|.*gateway.*|.*ap.*"),
        ("server", r".*srv.*|.*server.*"),
        ("workstation", r".*pc.*|.*laptop.*|.*desktop.*"),
    ]
    .into_iter()
    .map(|(t, p)| HostnameRule {
        device_type: t.to_string(),
        pattern: p.to_string(),
    })
    .collect();

    let service_patterns = vec![
        ServiceRule {
            device_type: "printer".to_string(),
            services: vec![pattern(631, "ipp")],
        },
        ServiceRule {
            device_type: "router".to_string(),
            services: vec![
                pattern(80, "http"),
                pattern(443, "https"),
                pattern(53, "domain"),
            ],
        },
        ServiceRule {
            device_type: "server".to_string(),
            services: vec![pattern(22, "ssh"), pattern(3389, "ms-wbt-server")],
        },
    ];

    RuleDocument {
        mac_prefixes,
        hostname_patterns,
        service_patterns,
    }
}

fn pattern(port: u16, service: &str) -> ServicePattern {
    ServicePattern {
        port,
        service: service.to_string(),
    }
}
