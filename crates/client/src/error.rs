//! Unified error handling for the session client.

use std::sync::Arc;

use gatehouse_core::CredentialError;
use reqwest::StatusCode;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by the HTTP pipeline and the session manager.
///
/// The type is `Clone` because a single login attempt is shared by every
/// concurrent caller and one refresh failure is delivered to every request
/// queued behind it.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Input rejected locally; no request was sent.
    #[error("Validation error: {0}")]
    Validation(#[from] CredentialError),

    /// No response was received (connect failure, DNS, timeout).
    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// The login or refresh endpoint rejected the credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The access token expired and could not be refreshed.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, as text.
        body: String,
    },

    /// The response body could not be used.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Reading or writing the token store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A request path could not be joined onto the base URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// A background task failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status carried by the error, if a response was received.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Authentication(_) => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }

    /// Returns true for errors that mean "not logged in any more".
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::SessionExpired(_)
        ) || self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 500 Internal Server Error: boom");

        let err = ApiError::SessionExpired("no refresh token".to_string());
        assert_eq!(err.to_string(), "Session expired: no refresh token");
    }

    #[test]
    fn test_validation_error_from_credentials() {
        let err: ApiError = CredentialError::MissingCredentials.into();
        assert_eq!(
            err.to_string(),
            "Validation error: username and password are required"
        );
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_unauthorized_classification() {
        assert!(ApiError::Authentication("bad password".to_string()).is_unauthorized());
        assert!(ApiError::SessionExpired("refresh failed".to_string()).is_unauthorized());
        assert!(
            ApiError::Status {
                status: StatusCode::UNAUTHORIZED,
                body: String::new(),
            }
            .is_unauthorized()
        );
        assert!(
            !ApiError::Status {
                status: StatusCode::FORBIDDEN,
                body: String::new(),
            }
            .is_unauthorized()
        );
    }
}
