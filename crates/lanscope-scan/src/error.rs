//! Error types for the lanscope-scan crate.

use std::net::IpAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Nmap not found at path: {path}")]
    NmapNotFound { path: String },

    #[error("Nmap exited with code {code}: {stderr}")]
    NmapFailed { code: i32, stderr: String },

    #[error("Failed to parse nmap XML output: {0}")]
    XmlParse(String),

    #[error("Discovery of {range} timed out after {secs}s")]
    DiscoverTimeout { range: String, secs: u64 },

    #[error("Service probe for {address} timed out after {secs}s")]
    ProbeTimeout { address: IpAddr, secs: u64 },

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Rule set error: {0}")]
    Rules(#[from] lanscope_core::CoreError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
