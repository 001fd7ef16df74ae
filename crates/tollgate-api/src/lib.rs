//! Tollgate API - authentication and session revocation server
//!
//! Provides HTTP endpoints for login, registration, logout, token refresh and
//! revocation, plus the middleware that guards protected routes.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

use axum::{routing::get, Json, Router};
use state::AppState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

/// OpenAPI document for the v1 API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tollgate API",
        description = "Authentication, token refresh and session revocation"
    ),
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::login_handler,
        handlers::auth::register_handler,
        handlers::auth::logout_handler,
        handlers::auth::refresh_handler,
        handlers::auth::revoke_all_tokens_handler,
        handlers::auth::revoke_device_tokens_handler,
        handlers::auth::me_handler,
        handlers::auth::admin_ping_handler,
    ),
    components(schemas(
        error::ApiError,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
        handlers::auth::MessageResponse,
        handlers::auth::RevokeResponse,
        handlers::auth::MeResponse,
        auth::LoginRequest,
        auth::RegisterRequest,
        auth::RefreshRequest,
        auth::RevokeDeviceRequest,
        auth::AuthResponse,
        auth::RefreshResponse,
        auth::UserInfo,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "auth", description = "Sessions and token revocation"),
        (name = "admin", description = "Administrator endpoints"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the application router over shared state
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_auth_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/auth/login"));
        assert!(doc
            .paths
            .paths
            .contains_key("/api/v1/auth/revoke-all-tokens/{user_id}"));

        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
