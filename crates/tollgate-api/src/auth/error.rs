//! Authentication error taxonomy
//!
//! Every variant maps to an HTTP status and a client-safe message. Messages
//! never reveal which credential check failed.

use super::jwt::JwtError;
use crate::error::ApiError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tollgate_core::StoreError;

/// Which revocation namespace rejected a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationScope {
    Token,
    User,
    Device,
}

impl std::fmt::Display for RevocationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevocationScope::Token => f.write_str("token"),
            RevocationScope::User => f.write_str("user"),
            RevocationScope::Device => f.write_str("device"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] JwtError),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token revoked ({0})")]
    Revoked(RevocationScope),

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Email already registered")]
    EmailTaken,

    #[error("Session store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("User service failure: {0}")]
    UpstreamFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidCredentials
            | AuthError::InvalidToken(_)
            | AuthError::TokenExpired
            | AuthError::Revoked(_) => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "MISSING_AUTH_HEADER",
            AuthError::InvalidAuthHeader => "INVALID_AUTH_HEADER",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::Revoked(RevocationScope::Token) => "TOKEN_REVOKED",
            AuthError::Revoked(RevocationScope::User) => "USER_REVOKED",
            AuthError::Revoked(RevocationScope::Device) => "DEVICE_REVOKED",
            AuthError::InsufficientPermissions => "FORBIDDEN",
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::EmailTaken => "EMAIL_TAKEN",
            AuthError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AuthError::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to return to the client
    pub fn client_message(&self) -> String {
        match self {
            AuthError::MissingAuthHeader => "Missing Authorization header".to_string(),
            AuthError::InvalidAuthHeader => "Invalid Authorization header format".to_string(),
            AuthError::InvalidCredentials => "Invalid email or password".to_string(),
            AuthError::InvalidToken(_) => "Invalid or expired token".to_string(),
            AuthError::TokenExpired => "Token has expired".to_string(),
            AuthError::Revoked(RevocationScope::Token) => "Token has been revoked".to_string(),
            AuthError::Revoked(RevocationScope::User) => {
                "All sessions for this user have been revoked".to_string()
            }
            AuthError::Revoked(RevocationScope::Device) => {
                "Session on this device has been revoked".to_string()
            }
            AuthError::InsufficientPermissions => "Insufficient permissions".to_string(),
            AuthError::Validation(msg) => msg.clone(),
            AuthError::EmailTaken => "Email already registered".to_string(),
            AuthError::StoreUnavailable(_) => "Session store unavailable".to_string(),
            AuthError::UpstreamFailure(_) => "User service unavailable".to_string(),
            AuthError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AuthError::StoreUnavailable(_)
            | AuthError::UpstreamFailure(_)
            | AuthError::Internal(_) => tracing::error!(error = %self, "Request failed"),
            _ => tracing::debug!(error = %self, "Request rejected"),
        }

        let body = ApiError::new(self.code(), self.client_message(), status);
        (status, Json(body)).into_response()
    }
}
