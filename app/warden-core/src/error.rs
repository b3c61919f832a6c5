//! Error types for the core layer.

use crate::registry::RegistryError;
use thiserror::Error;
use warden_error::CommonError;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Result type alias for engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failures reported by (or while talking to) the container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine does not know the resource.
    #[error("{0}")]
    NotFound(String),

    /// The engine refused because of resource state (name in use, running).
    #[error("{0}")]
    Conflict(String),

    /// The engine rejected the request payload.
    #[error("{0}")]
    BadRequest(String),

    /// Any other non-success status.
    #[error("engine returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Engine message.
        message: String,
    },

    /// The engine could not be reached.
    #[error("engine unreachable: {0}")]
    Transport(String),

    /// The engine answered with something we could not parse.
    #[error("malformed engine response: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Builds the matching variant for an engine status code.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Self::BadRequest(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            _ => Self::Status { status, message },
        }
    }

    /// Returns true when the engine could not be contacted at all.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Common errors (I/O, config, engine incompatibility).
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Ownership lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Engine call failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The request would break the sandbox.
    #[error("{0}")]
    Forbidden(String),

    /// Malformed or incomplete request.
    #[error("{0}")]
    InvalidRequest(String),

    /// The image is not owned and could not be pulled.
    #[error("access to image {image} denied: {reason}")]
    ImageDenied {
        /// Image reference as supplied.
        image: String,
        /// Pull failure.
        reason: String,
    },
}

impl CoreError {
    /// Creates a sandbox violation error.
    #[must_use]
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Creates a client error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Common(CommonError::config(msg))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceKind;

    #[test]
    fn status_codes_map_to_variants() {
        assert!(matches!(
            EngineError::from_status(404, "no such image"),
            EngineError::NotFound(_)
        ));
        assert!(matches!(
            EngineError::from_status(409, "name in use"),
            EngineError::Conflict(_)
        ));
        assert!(matches!(
            EngineError::from_status(500, "boom"),
            EngineError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn registry_errors_stay_transparent() {
        let err: CoreError = RegistryError::NotFound {
            kind: ResourceKind::Container,
            id: "abc".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "no such container: abc");
    }
}
