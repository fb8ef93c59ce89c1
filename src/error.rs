//! Error types for the Tiger server
//!
//! Every component reports failures through [`TigerError`]. The dispatcher
//! turns them into HTTP responses; nothing propagates into the serving loop.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Tiger Error Enum ==
/// Unified error type for the server core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TigerError {
    /// No static file and no script matched the request
    #[error("Not found: {0}")]
    NotFound(String),

    /// A file in the scripts directory is not a compiled artifact
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// The artifact could not be read from disk in time
    #[error("Artifact load failed: {0}")]
    ArtifactLoad(String),

    /// The script exceeded its execution budget
    #[error("Execution timeout: {0}")]
    ExecutionTimeout(String),

    /// The script raised a fault or exceeded a resource limit
    #[error("Execution fault: {0}")]
    ExecutionFault(String),

    /// The cache medium rejected a read or write
    #[error("Cache medium unavailable: {0}")]
    CacheMediumUnavailable(String),

    /// The method is not allowed for the target; carries the `Allow` value
    #[error("Method not allowed, allowed: {0}")]
    MethodNotAllowed(String),

    /// The method is not understood at all
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Malformed request data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TigerError {
    /// HTTP status the dispatcher answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            TigerError::NotFound(_) => StatusCode::NOT_FOUND,
            TigerError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            TigerError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            TigerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TigerError::InvalidArtifact(_)
            | TigerError::ArtifactLoad(_)
            | TigerError::ExecutionTimeout(_)
            | TigerError::ExecutionFault(_)
            | TigerError::CacheMediumUnavailable(_)
            | TigerError::Config(_)
            | TigerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients. Never contains diagnostics.
    pub fn public_message(&self) -> &'static str {
        public_message_for(self.status_code())
    }
}

/// Generic, user-facing text for an error status.
pub fn public_message_for(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "Your request could not be understood.",
        401 => "You are not authorized to view this resource.",
        403 => "You are not allowed to access this resource.",
        404 => "The requested resource could not be found.",
        405 => "This resource does not accept that method.",
        410 => "The requested resource is gone and will not come back.",
        501 => "The server does not implement that method.",
        503 => "The server is overloaded, try again later.",
        505 => "Your HTTP version is not supported.",
        _ => "The server could not complete your request.",
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for TigerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            self.public_message().to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse::new(message));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the server core.
pub type Result<T> = std::result::Result<T, TigerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (TigerError::NotFound("/x".into()), StatusCode::NOT_FOUND),
            (TigerError::InvalidArtifact("a".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (TigerError::ExecutionTimeout("a".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (TigerError::ExecutionFault("a".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (TigerError::MethodNotAllowed("GET".into()), StatusCode::METHOD_NOT_ALLOWED),
            (TigerError::NotImplemented("BREW".into()), StatusCode::NOT_IMPLEMENTED),
            (TigerError::BadRequest("bad".into()), StatusCode::BAD_REQUEST),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected, "{error}");
        }
    }

    #[test]
    fn test_public_message_hides_details() {
        let error = TigerError::ExecutionFault("stack: secret.rs:42".into());
        assert!(!error.public_message().contains("secret"));
    }

    #[tokio::test]
    async fn test_into_response_hides_server_error_detail() {
        let response = TigerError::Internal("db password wrong".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(!json["error"].as_str().unwrap().contains("password"));
    }
}
