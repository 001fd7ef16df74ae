//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::middleware::{auth_middleware, require_any_role};
use crate::handlers::auth;
use crate::rate_limit::limit_per_client;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required, rate limited per client)
    // Logout reads the bearer token itself so that expired tokens can still log out
    let public_routes = limit_per_client(
        Router::new()
            .route("/auth/register", post(auth::register_handler))
            .route("/auth/login", post(auth::login_handler))
            .route("/auth/logout", post(auth::logout_handler))
            .route("/auth/refresh-token", post(auth::refresh_handler)),
        &state.config.rate_limit,
    );

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route(
            "/auth/revoke-all-tokens/{user_id}",
            post(auth::revoke_all_tokens_handler),
        )
        .route(
            "/auth/revoke-device-tokens/{user_id}",
            post(auth::revoke_device_tokens_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Admin routes (authentication plus an admin role)
    let admin_routes = Router::new()
        .route("/admin/ping", get(auth::admin_ping_handler))
        .route_layer(middleware::from_fn(require_any_role(
            state.config.auth.admin_roles.clone(),
        )))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
}
