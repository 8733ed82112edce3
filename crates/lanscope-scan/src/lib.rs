//! lanscope-scan: Network discovery and classification daemon.
//!
//! Sweeps a network range on a schedule, probes responding hosts for open
//! services, classifies each host through the lanscope-core recognition
//! engine, and reconciles the batch into the SQLite topology store.

pub mod config;
pub mod error;
pub mod monitor;
pub mod nmap_xml;
pub mod probe;
pub mod store;
