//! lanscope-core: Shared types and recognition logic for the lanscope network mapper.
//!
//! This crate provides the foundational pieces used across lanscope components:
//! - Observation and device types exchanged between the probe layer and the store
//! - The recognition rule set (document format, compilation, built-in defaults)
//! - The pure device recognition engine and capability profiles
//! - Common error types

pub mod error;
pub mod recognize;
pub mod rules;
pub mod types;

pub use error::CoreError;
pub use recognize::{capabilities_for, recognize};
pub use rules::RuleSet;
