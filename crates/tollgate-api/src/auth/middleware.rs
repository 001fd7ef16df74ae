//! Request authentication
//!
//! Decides accept/reject for every request carrying a bearer token. The
//! checks run in a fixed order and every one of them must pass:
//!
//! 1. `Authorization: Bearer <token>` is present and well formed
//! 2. the token is not blacklisted
//! 3. signature, issuer, expiry and class verify as an access token
//! 4. no user-wide revocation covers the token's issue time
//! 5. the token's device is not revoked
//! 6. the role is one of the required roles, when any are required
//!
//! A store failure at any step rejects the request.

use super::error::{AuthError, RevocationScope};
use super::jwt::{Claims, TokenClass, TokenCodec};
use super::registry::{RevocationKey, SessionRegistry};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Caller identity attached to request extensions once accepted
///
/// Extract in handlers with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: Claims,
    /// The bearer token the request was accepted with
    pub token: String,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> i64 {
        self.claims.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.claims.device_id
    }

    pub fn role(&self) -> &str {
        &self.claims.role
    }

    /// True when `roles` is empty or contains the caller's role
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.is_empty() || roles.iter().any(|r| r == &self.claims.role)
    }
}

/// Parse `Bearer <token>` out of an Authorization header value
pub fn parse_bearer(authorization: Option<&str>) -> Result<&str, AuthError> {
    let value = authorization.ok_or(AuthError::MissingAuthHeader)?;
    let (scheme, token) = value
        .trim_start()
        .split_once(' ')
        .ok_or(AuthError::InvalidAuthHeader)?;

    // Auth schemes are case-insensitive (RFC 7235)
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// Read the Authorization header, rejecting non-ASCII values
pub fn authorization_header(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().map_err(|_| AuthError::InvalidAuthHeader))
        .transpose()
}

/// Per-request gate over the token codec and session registry
#[derive(Clone)]
pub struct RequestAuthenticator {
    codec: Arc<TokenCodec>,
    registry: SessionRegistry,
}

impl RequestAuthenticator {
    pub fn new(codec: Arc<TokenCodec>, registry: SessionRegistry) -> Self {
        Self { codec, registry }
    }

    /// Accept or reject a request
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        required_roles: &[String],
    ) -> Result<AuthenticatedUser, AuthError> {
        let token = parse_bearer(authorization)?;

        // Cheap store lookup before signature work
        if self.registry.is_revoked(RevocationKey::Token(token)).await? {
            return Err(AuthError::Revoked(RevocationScope::Token));
        }

        let claims = self.codec.verify(token, TokenClass::Access)?;

        if let Some(revocation) = self.registry.user_revoked_since(claims.user_id).await? {
            if revocation.voids(claims.iat_ms) {
                return Err(AuthError::Revoked(RevocationScope::User));
            }
        }

        let device = RevocationKey::Device {
            user_id: claims.user_id,
            device_id: &claims.device_id,
        };
        if self.registry.is_revoked(device).await? {
            return Err(AuthError::Revoked(RevocationScope::Device));
        }

        let user = AuthenticatedUser {
            claims,
            token: token.to_string(),
        };
        if !user.has_any_role(required_roles) {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(user)
    }
}

/// Audit record for a rejected request
///
/// Store and internal failures are not the client's doing and are logged by
/// the error response instead.
fn rejection_event(err: &AuthError, headers: &HeaderMap) -> Option<AuditEvent> {
    if matches!(err, AuthError::StoreUnavailable(_) | AuthError::Internal(_)) {
        return None;
    }

    Some(AuditEvent::AuthenticationRejected {
        code: err.code().to_string(),
        reason: err.to_string(),
        ip_address: extract_ip_address(headers),
        user_agent: extract_user_agent(headers),
    })
}

fn audit_rejection(err: &AuthError, headers: &HeaderMap) {
    if let Some(event) = rejection_event(err, headers) {
        audit_log(&event);
    }
}

/// Authentication middleware that requires a valid, unrevoked access token
///
/// On success the [`AuthenticatedUser`] is added to request extensions.
///
/// ```ignore
/// let protected = Router::new()
///     .route("/auth/me", get(me_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let result = match authorization_header(request.headers()) {
        Ok(header) => state.authenticator.authenticate(header, &[]).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(err) => {
            audit_rejection(&err, request.headers());
            Err(err)
        }
    }
}

/// Type alias for role middleware future
type RoleMiddlewareFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AuthError>> + Send>>;

/// Middleware factory for role-based access control
///
/// Must be layered inside [`auth_middleware`]. Membership is strict: no role
/// bypasses the check unless it is listed.
///
/// ```ignore
/// let admin = Router::new()
///     .route("/admin/ping", get(admin_ping))
///     .route_layer(middleware::from_fn(require_any_role(vec!["admin".into()])))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub fn require_any_role(
    required_roles: Vec<String>,
) -> impl Fn(Request, Next) -> RoleMiddlewareFuture + Clone {
    let required_roles: Arc<[String]> = required_roles.into();
    move |request: Request, next: Next| {
        let required_roles = required_roles.clone();
        Box::pin(async move {
            let user = match request.extensions().get::<AuthenticatedUser>() {
                Some(user) => user.clone(),
                None => {
                    let err = AuthError::MissingAuthHeader;
                    audit_rejection(&err, request.headers());
                    return Err(err);
                }
            };

            if !user.has_any_role(&required_roles) {
                audit_log(&AuditEvent::AccessDenied {
                    user_id: Some(user.user_id()),
                    resource: request.uri().path().to_string(),
                    required_role: Some(required_roles.join(",")),
                    ip_address: extract_ip_address(request.headers()),
                    user_agent: extract_user_agent(request.headers()),
                });

                return Err(AuthError::InsufficientPermissions);
            }

            Ok(next.run(request).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{unix_now_ms, TokenIdentity};
    use crate::auth::registry::REVOCATION_TTL;
    use tollgate_core::{JwtConfig, MemoryStore, StoreError};

    fn setup() -> (RequestAuthenticator, Arc<TokenCodec>, SessionRegistry) {
        let codec = Arc::new(TokenCodec::new(&JwtConfig::default()));
        let registry = SessionRegistry::new(Arc::new(MemoryStore::new()));
        (
            RequestAuthenticator::new(codec.clone(), registry.clone()),
            codec,
            registry,
        )
    }

    fn bearer(codec: &TokenCodec, user_id: i64, device_id: &str, role: &str) -> (String, String) {
        let identity = TokenIdentity {
            user_id,
            device_id: device_id.to_string(),
            role: role.to_string(),
        };
        let token = codec.issue(&identity, TokenClass::Access).unwrap().token;
        (format!("Bearer {token}"), token)
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        assert_eq!(parse_bearer(Some("bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(parse_bearer(Some("BEARER abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(parse_bearer(Some("Bearer   abc.def.ghi ")).unwrap(), "abc.def.ghi");
        assert!(matches!(parse_bearer(Some("Bearer")), Err(AuthError::InvalidAuthHeader)));
        assert!(matches!(
            parse_bearer(Some("Bearerabc.def.ghi")),
            Err(AuthError::InvalidAuthHeader)
        ));
    }

    #[test]
    fn test_rejection_event_carries_error_code() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.7".parse().unwrap());

        let cases = [
            (AuthError::MissingAuthHeader, "MISSING_AUTH_HEADER"),
            (AuthError::TokenExpired, "TOKEN_EXPIRED"),
            (AuthError::Revoked(RevocationScope::Device), "DEVICE_REVOKED"),
        ];
        for (err, expected) in cases {
            match rejection_event(&err, &headers) {
                Some(AuditEvent::AuthenticationRejected { code, ip_address, .. }) => {
                    assert_eq!(code, expected);
                    assert_eq!(ip_address.as_deref(), Some("198.51.100.7"));
                }
                other => panic!("unexpected audit event: {other:?}"),
            }
        }
    }

    #[test]
    fn test_store_outage_is_not_audited_as_rejection() {
        let err = AuthError::StoreUnavailable(StoreError::Timeout(250));
        assert!(rejection_event(&err, &HeaderMap::new()).is_none());
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer(Some("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert!(matches!(parse_bearer(None), Err(AuthError::MissingAuthHeader)));
        assert!(matches!(
            parse_bearer(Some("Basic dXNlcjpwYXNz")),
            Err(AuthError::InvalidAuthHeader)
        ));
        assert!(matches!(parse_bearer(Some("Bearer ")), Err(AuthError::InvalidAuthHeader)));
        assert!(matches!(
            parse_bearer(Some("Bearer a b")),
            Err(AuthError::InvalidAuthHeader)
        ));
    }

    #[tokio::test]
    async fn test_accepts_valid_token() {
        let (auth, codec, _) = setup();
        let (header, token) = bearer(&codec, 42, "dev-A", "user");

        let user = auth.authenticate(Some(&header), &[]).await.unwrap();
        assert_eq!(user.user_id(), 42);
        assert_eq!(user.device_id(), "dev-A");
        assert_eq!(user.token, token);
    }

    #[tokio::test]
    async fn test_rejects_blacklisted_token() {
        let (auth, codec, registry) = setup();
        let (header, token) = bearer(&codec, 42, "dev-A", "user");
        registry
            .mark_revoked(RevocationKey::Token(&token), REVOCATION_TTL)
            .await
            .unwrap();

        let result = auth.authenticate(Some(&header), &[]).await;
        assert!(matches!(result, Err(AuthError::Revoked(RevocationScope::Token))));
    }

    #[tokio::test]
    async fn test_rejects_refresh_token() {
        let (auth, codec, _) = setup();
        let identity = TokenIdentity {
            user_id: 42,
            device_id: "dev-A".to_string(),
            role: "user".to_string(),
        };
        let refresh = codec.issue(&identity, TokenClass::Refresh).unwrap().token;

        let result = auth.authenticate(Some(&format!("Bearer {refresh}")), &[]).await;
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_user_revocation_covers_earlier_tokens_only() {
        let (auth, codec, registry) = setup();
        let (header, _) = bearer(&codec, 42, "dev-A", "user");
        let now = unix_now_ms().unwrap();

        registry.revoke_user(42, now).await.unwrap();
        let result = auth.authenticate(Some(&header), &[]).await;
        assert!(matches!(result, Err(AuthError::Revoked(RevocationScope::User))));

        // A marker older than the token does not affect it
        registry.revoke_user(42, now - 60_000).await.unwrap();
        assert!(auth.authenticate(Some(&header), &[]).await.is_ok());

        // Another user is unaffected
        let (other, _) = bearer(&codec, 43, "dev-A", "user");
        registry.revoke_user(42, now).await.unwrap();
        assert!(auth.authenticate(Some(&other), &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_token_issued_right_after_user_revocation_is_accepted() {
        let (auth, codec, registry) = setup();
        let (old, _) = bearer(&codec, 42, "dev-A", "user");
        registry.revoke_user(42, unix_now_ms().unwrap()).await.unwrap();

        // Same wall-clock second, later millisecond
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let (fresh, _) = bearer(&codec, 42, "dev-A", "user");

        let result = auth.authenticate(Some(&old), &[]).await;
        assert!(matches!(result, Err(AuthError::Revoked(RevocationScope::User))));
        assert!(auth.authenticate(Some(&fresh), &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_revoked_device() {
        let (auth, codec, registry) = setup();
        let (on_a, _) = bearer(&codec, 42, "dev-A", "user");
        let (on_b, _) = bearer(&codec, 42, "dev-B", "user");
        registry.revoke_device(42, "dev-A").await.unwrap();

        let result = auth.authenticate(Some(&on_a), &[]).await;
        assert!(matches!(result, Err(AuthError::Revoked(RevocationScope::Device))));
        assert!(auth.authenticate(Some(&on_b), &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_role_membership() {
        let (auth, codec, _) = setup();
        let (user_header, _) = bearer(&codec, 1, "d", "user");
        let (admin_header, _) = bearer(&codec, 2, "d", "admin");
        let admins = vec!["admin".to_string(), "superadmin".to_string()];

        let result = auth.authenticate(Some(&user_header), &admins).await;
        assert!(matches!(result, Err(AuthError::InsufficientPermissions)));
        assert!(auth.authenticate(Some(&admin_header), &admins).await.is_ok());
    }
}
