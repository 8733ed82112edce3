use thiserror::Error;

/// Errors raised while loading and compiling a recognition rule set.
///
/// All of these are configuration-class failures: they can only occur at
/// startup, before monitoring begins, and are always fatal.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Failed to read rule file {path}: {source}")]
    RuleFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed rule document: {0}")]
    RuleParse(#[from] serde_json::Error),

    #[error("Invalid regex for device type {device_type}: {pattern}: {source}")]
    InvalidPattern {
        device_type: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
