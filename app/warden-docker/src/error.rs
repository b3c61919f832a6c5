//! Error types for the engine API surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use warden_core::{CoreError, EngineError, RegistryError};

/// Result type alias for API handlers.
pub type Result<T> = std::result::Result<T, DockerError>;

/// Errors returned to API callers.
#[derive(Debug, Error)]
pub enum DockerError {
    /// Malformed body, query value or missing field.
    #[error("{0}")]
    InvalidParameter(String),

    /// Not owned, or would break the sandbox.
    #[error("{0}")]
    Forbidden(String),

    /// Unknown resource or endpoint.
    #[error("{0}")]
    NotFound(String),

    /// Ambiguous reference or engine-side conflict.
    #[error("{0}")]
    Conflict(String),

    /// Engine status relayed as-is (e.g. 304 for an already started container).
    #[error("{message}")]
    Upstream {
        /// Engine status.
        status: StatusCode,
        /// Engine message.
        message: String,
    },

    /// Server error.
    #[error("{0}")]
    Server(String),
}

impl DockerError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream { status, .. } => *status,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for DockerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidRequest(msg) => Self::InvalidParameter(msg),
            CoreError::Forbidden(msg) => Self::Forbidden(msg),
            err @ CoreError::ImageDenied { .. } => Self::Forbidden(err.to_string()),
            CoreError::Registry(err @ RegistryError::NotFound { .. }) => {
                Self::Forbidden(err.to_string())
            }
            CoreError::Registry(err @ RegistryError::Ambiguous { .. }) => {
                Self::Conflict(err.to_string())
            }
            CoreError::Engine(err) => err.into(),
            CoreError::Common(err) => {
                tracing::error!("internal failure: {err}");
                Self::Server(err.to_string())
            }
        }
    }
}

impl From<EngineError> for DockerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(msg) => Self::NotFound(msg),
            EngineError::Conflict(msg) => Self::Conflict(msg),
            EngineError::BadRequest(msg) => Self::InvalidParameter(msg),
            EngineError::Status { status, message } => match StatusCode::from_u16(status) {
                Ok(status) if status.is_client_error() || status.is_redirection() => {
                    Self::Upstream { status, message }
                }
                _ => {
                    tracing::error!(status, "engine failure: {message}");
                    Self::Server(message)
                }
            },
            err => {
                tracing::error!("engine failure: {err}");
                Self::Server(err.to_string())
            }
        }
    }
}

/// Engine-style error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub message: String,
}

impl IntoResponse for DockerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::NOT_MODIFIED {
            return status.into_response();
        }
        let body = ErrorResponse {
            message: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ResourceKind;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases: Vec<(CoreError, StatusCode)> = vec![
            (CoreError::invalid("No exec command specified"), StatusCode::BAD_REQUEST),
            (CoreError::forbidden("bind"), StatusCode::FORBIDDEN),
            (
                RegistryError::NotFound {
                    kind: ResourceKind::Container,
                    id: "x".to_string(),
                }
                .into(),
                StatusCode::FORBIDDEN,
            ),
            (
                RegistryError::Ambiguous {
                    kind: ResourceKind::Container,
                    id: "a".to_string(),
                    matches: 2,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (
                EngineError::NotFound("No such image".to_string()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::Transport("refused".to_string()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(DockerError::from(err).status_code(), status);
        }
    }

    #[test]
    fn not_modified_is_relayed() {
        let err = DockerError::from(EngineError::from_status(304, ""));
        assert_eq!(err.status_code(), StatusCode::NOT_MODIFIED);
        assert_eq!(err.into_response().status(), StatusCode::NOT_MODIFIED);
    }
}
