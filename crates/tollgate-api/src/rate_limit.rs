//! Per-client rate limiting for the public auth routes
//!
//! Clients are keyed by the first `X-Forwarded-For` hop, then `X-Real-IP`,
//! then the peer address. The peer address is only available when the router
//! is served with `into_make_service_with_connect_info::<SocketAddr>()`.
//!
//! Excess requests are answered with 429 and a `retry-after` header.

use axum::Router;
use tollgate_core::RateLimitConfig;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};

/// Wrap `router` in a per-client limiter built from `config`
///
/// Returns the router unchanged when limiting is disabled.
pub fn limit_per_client<S>(router: Router<S>, config: &RateLimitConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if !config.enabled {
        tracing::warn!("Rate limiting disabled for auth routes");
        return router;
    }

    let Some(governor) = GovernorConfigBuilder::default()
        .period(config.replenish_interval())
        .burst_size(config.max_requests)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
    else {
        tracing::error!(
            max_requests = config.max_requests,
            window_secs = config.window_secs,
            "Rate limit settings rejected, auth routes are not limited"
        );
        return router;
    };

    tracing::debug!(
        max_requests = config.max_requests,
        window_secs = config.window_secs,
        "Rate limiting auth routes per client"
    );
    router.layer(GovernorLayer::new(governor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{Request, StatusCode},
        routing::get,
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn limited(max_requests: u32) -> Router {
        let config = RateLimitConfig {
            enabled: true,
            max_requests,
            window_secs: 60,
        };
        limit_per_client(Router::new().route("/", get(|| async { "ok" })), &config)
    }

    fn from_peer(ip: [u8; 4]) -> Request<Body> {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
        request
    }

    #[tokio::test]
    async fn test_burst_then_too_many_requests() {
        let app = limited(2);

        for _ in 0..2 {
            let response = app.clone().oneshot(from_peer([10, 0, 0, 1])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(from_peer([10, 0, 0, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // Other clients keep their own budget
        let response = app.oneshot(from_peer([10, 0, 0, 2])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forwarded_client_is_limited_separately_from_proxy() {
        let app = limited(1);
        let via_proxy = |client: &str| {
            let mut request = from_peer([192, 0, 2, 10]);
            request
                .headers_mut()
                .insert("x-forwarded-for", client.parse().unwrap());
            request
        };

        let response = app.clone().oneshot(via_proxy("203.0.113.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.clone().oneshot(via_proxy("203.0.113.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(via_proxy("203.0.113.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_disabled_limit_passes_everything() {
        let config = RateLimitConfig {
            enabled: false,
            max_requests: 1,
            window_secs: 60,
        };
        let app = limit_per_client(Router::new().route("/", get(|| async { "ok" })), &config);

        for _ in 0..5 {
            let response = app.clone().oneshot(from_peer([10, 0, 0, 1])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
