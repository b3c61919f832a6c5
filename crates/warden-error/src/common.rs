//! Errors shared across Warden crates.

use thiserror::Error;

/// Failures that are not tied to a particular gateway layer.
#[derive(Debug, Error)]
pub enum CommonError {
    /// Local I/O failure (listener sockets, cgroup probing, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine speaks an API older than the gateway targets.
    #[error("incompatible engine: {0}")]
    Incompatible(String),
}

impl CommonError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an engine incompatibility error.
    #[must_use]
    pub fn incompatible(msg: impl Into<String>) -> Self {
        Self::Incompatible(msg.into())
    }
}
