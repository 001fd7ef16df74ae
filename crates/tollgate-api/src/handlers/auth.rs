//! Authentication API handlers
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::middleware::{authorization_header, parse_bearer};
use crate::auth::{
    AuthenticatedUser, ClientContext, LoginRequest, RefreshRequest, RegisterRequest,
    RevokeDeviceRequest,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Plain message response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Revocation result
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokeResponse {
    pub message: String,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Tokens issued at or before this Unix time (milliseconds) are void
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at_ms: Option<u64>,
}

/// Identity of the authenticated caller
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub user_id: i64,
    pub device_id: String,
    pub role: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Login with email and password
///
/// Returns an access token, a refresh token and the user profile. Any earlier
/// logout of the same device is lifted.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = crate::auth::AuthResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 429, description = "Rate limit exceeded"),
        (status = 502, description = "User service unavailable", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = ClientContext::from_headers(&headers);
    let response = state.auth_service.login(request, &ctx).await?;

    Ok(Json(response))
}

/// Register a new user account
///
/// New users get the `user` role and are logged in immediately.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = crate::auth::AuthResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
        (status = 429, description = "Rate limit exceeded"),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = ClientContext::from_headers(&headers);
    let response = state.auth_service.register(request, &ctx).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Logout the current device
///
/// Blacklists the bearer token for its remaining lifetime and revokes the
/// device, which also stops its refresh token. Expired tokens are accepted.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = MessageResponse),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
        (status = 429, description = "Rate limit exceeded"),
        (status = 503, description = "Session store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = parse_bearer(authorization_header(&headers)?)?;
    let claims = state.auth_service.logout(token).await?;

    audit_log(&AuditEvent::Logout {
        user_id: claims.user_id,
        device_id: claims.device_id,
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// Refresh access token
///
/// Exchanges a refresh token for a new access token with the same identity.
/// When `old_access_token` is supplied it is blacklisted on a best-effort basis.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh-token",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = crate::auth::RefreshResponse),
        (status = 401, description = "Invalid, expired or revoked refresh token", body = crate::error::ApiError),
        (status = 429, description = "Rate limit exceeded"),
        (status = 503, description = "Session store unavailable", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (claims, response) = state.auth_service.refresh(request).await?;

    audit_log(&AuditEvent::TokenRefresh {
        user_id: claims.user_id,
        device_id: claims.device_id,
        ip_address: extract_ip_address(&headers),
        user_agent: extract_user_agent(&headers),
    });

    Ok(Json(response))
}

fn ensure_may_manage(
    state: &AppState,
    caller: &AuthenticatedUser,
    target_user_id: i64,
    headers: &HeaderMap,
) -> Result<(), AppError> {
    if state.may_manage_sessions_of(caller, target_user_id) {
        return Ok(());
    }

    audit_log(&AuditEvent::AccessDenied {
        user_id: Some(caller.user_id()),
        resource: format!("sessions:user:{target_user_id}"),
        required_role: Some(state.config.auth.admin_roles.join(",")),
        ip_address: extract_ip_address(headers),
        user_agent: extract_user_agent(headers),
    });
    Err(AppError::Forbidden(
        "Cannot revoke sessions of another user".to_string(),
    ))
}

/// Revoke every token of a user
///
/// Access tokens issued up to now stop working on their next use. The caller
/// must be the user or hold an admin role.
#[utoipa::path(
    post,
    path = "/api/v1/auth/revoke-all-tokens/{user_id}",
    tag = "auth",
    params(("user_id" = i64, Path, description = "User whose tokens are revoked")),
    responses(
        (status = 200, description = "Tokens revoked", body = RevokeResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Not allowed for this user", body = crate::error::ApiError),
        (status = 503, description = "Session store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn revoke_all_tokens_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    ensure_may_manage(&state, &caller, user_id, &headers)?;

    let revoked_at_ms = state.auth_service.revoke_all_tokens(user_id).await?;

    audit_log(&AuditEvent::TokensRevoked {
        user_id,
        device_id: None,
        revoked_by: Some(caller.user_id()),
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(RevokeResponse {
        message: "All tokens revoked".to_string(),
        user_id,
        device_id: None,
        revoked_at_ms: Some(revoked_at_ms),
    }))
}

/// Revoke every token of a user on one device
#[utoipa::path(
    post,
    path = "/api/v1/auth/revoke-device-tokens/{user_id}",
    tag = "auth",
    params(("user_id" = i64, Path, description = "User whose device is revoked")),
    request_body = RevokeDeviceRequest,
    responses(
        (status = 200, description = "Device tokens revoked", body = RevokeResponse),
        (status = 400, description = "Invalid device id", body = crate::error::ApiError),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Not allowed for this user", body = crate::error::ApiError),
        (status = 503, description = "Session store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn revoke_device_tokens_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<RevokeDeviceRequest>,
) -> Result<impl IntoResponse, AppError> {
    ensure_may_manage(&state, &caller, user_id, &headers)?;

    state
        .auth_service
        .revoke_device_tokens(user_id, &request.device_id)
        .await?;

    audit_log(&AuditEvent::TokensRevoked {
        user_id,
        device_id: Some(request.device_id.clone()),
        revoked_by: Some(caller.user_id()),
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(RevokeResponse {
        message: "Device tokens revoked".to_string(),
        user_id,
        device_id: Some(request.device_id),
        revoked_at_ms: None,
    }))
}

/// Get the authenticated caller's token identity
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Caller identity", body = MeResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(Extension(user): Extension<AuthenticatedUser>) -> impl IntoResponse {
    Json(MeResponse {
        user_id: user.claims.user_id,
        device_id: user.claims.device_id,
        role: user.claims.role,
        issued_at: user.claims.iat,
        expires_at: user.claims.exp,
    })
}

/// Role-gated probe for administrators
#[utoipa::path(
    get,
    path = "/api/v1/admin/ping",
    tag = "admin",
    responses(
        (status = 200, description = "Caller holds an admin role", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Insufficient permissions", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn admin_ping_handler(Extension(user): Extension<AuthenticatedUser>) -> impl IntoResponse {
    Json(MessageResponse::new(format!("pong ({})", user.role())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_response_omits_empty_fields() {
        let response = RevokeResponse {
            message: "All tokens revoked".to_string(),
            user_id: 42,
            device_id: None,
            revoked_at_ms: Some(1_700_000_000_250),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["user_id"], 42);
        assert!(json.get("device_id").is_none());
        assert_eq!(json["revoked_at_ms"], 1_700_000_000_250u64);
    }
}
