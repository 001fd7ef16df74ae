//! API error handling
//!
//! Author: hephaex@gmail.com

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// HTTP status code
    pub status: u16,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    Forbidden(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Auth(err) => err.into_response(),
            AppError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                Json(ApiError::new("FORBIDDEN", msg, StatusCode::FORBIDDEN)),
            )
                .into_response(),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tollgate_core::StoreError;

    #[test]
    fn test_auth_errors_keep_their_status() {
        let response = AppError::from(AuthError::EmailTaken).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::Forbidden("not yours".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_store_outage_maps_to_service_unavailable() {
        let err = AuthError::StoreUnavailable(StoreError::Timeout(500));
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error: ApiError = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "STORE_UNAVAILABLE");
    }
}
