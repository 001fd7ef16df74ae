//! Security audit logging for authentication events
//!
//! Events go to the `audit` tracing target so they can be routed apart from
//! application logs (`RUST_LOG=audit=info`). Rejections are logged at WARN,
//! everything else at INFO.
//!
//! Author: hephaex@gmail.com

use axum::http::{header, HeaderMap};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Security audit events for authentication and session revocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful user login
    LoginSuccess {
        user_id: i64,
        email: String,
        device_id: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed login attempt
    ///
    /// `reason` distinguishes unknown email from bad password; the client
    /// only ever sees the generic message.
    LoginFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Successful user registration
    RegistrationSuccess {
        user_id: i64,
        email: String,
        role: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed registration attempt
    RegistrationFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Device logout
    Logout {
        user_id: i64,
        device_id: String,
        ip_address: Option<String>,
    },

    /// Access token refresh
    TokenRefresh {
        user_id: i64,
        device_id: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// User-wide or per-device revocation
    TokensRevoked {
        user_id: i64,
        /// `None` for a user-wide revoke
        device_id: Option<String>,
        /// Caller that requested the revoke, `None` from the operator CLI
        revoked_by: Option<i64>,
        ip_address: Option<String>,
    },

    /// Access denied due to insufficient permissions
    AccessDenied {
        user_id: Option<i64>,
        resource: String,
        required_role: Option<String>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Request rejected by the authenticator
    ///
    /// `code` is the stable error code the client received, so a missing
    /// header, an expired token and a revoked session can be told apart.
    AuthenticationRejected {
        code: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },
}

impl AuditEvent {
    /// Short human-readable summary used as the log message
    pub fn summary(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::TokensRevoked { .. } => "Tokens revoked",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::AuthenticationRejected { .. } => "Authentication rejected",
        }
    }

    /// Subject user, when the event has one
    pub fn subject(&self) -> Option<i64> {
        match self {
            AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::RegistrationSuccess { user_id, .. }
            | AuditEvent::Logout { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::TokensRevoked { user_id, .. } => Some(*user_id),
            AuditEvent::AccessDenied { user_id, .. } => *user_id,
            AuditEvent::LoginFailure { .. }
            | AuditEvent::RegistrationFailure { .. }
            | AuditEvent::AuthenticationRejected { .. } => None,
        }
    }

    pub fn ip_address(&self) -> Option<&str> {
        match self {
            AuditEvent::LoginSuccess { ip_address, .. }
            | AuditEvent::LoginFailure { ip_address, .. }
            | AuditEvent::RegistrationSuccess { ip_address, .. }
            | AuditEvent::RegistrationFailure { ip_address, .. }
            | AuditEvent::Logout { ip_address, .. }
            | AuditEvent::TokenRefresh { ip_address, .. }
            | AuditEvent::TokensRevoked { ip_address, .. }
            | AuditEvent::AccessDenied { ip_address, .. }
            | AuditEvent::AuthenticationRejected { ip_address, .. } => ip_address.as_deref(),
        }
    }

    /// Failure or denial events are logged at WARN
    fn is_rejection(&self) -> bool {
        matches!(
            self,
            AuditEvent::LoginFailure { .. }
                | AuditEvent::RegistrationFailure { .. }
                | AuditEvent::AccessDenied { .. }
                | AuditEvent::AuthenticationRejected { .. }
        )
    }
}

/// Emit an audit event on the `audit` target
///
/// The full event is attached as JSON; the subject and client address are
/// repeated as fields so they can be filtered without parsing it.
pub fn audit_log(event: &AuditEvent) {
    let payload = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"unserializable audit event: {e}\"}}"));
    let recorded_at = Utc::now().to_rfc3339();

    if event.is_rejection() {
        warn!(
            target: "audit",
            recorded_at = %recorded_at,
            user_id = ?event.subject(),
            ip_address = ?event.ip_address(),
            event = %payload,
            "{}",
            event.summary()
        );
    } else {
        info!(
            target: "audit",
            recorded_at = %recorded_at,
            user_id = ?event.subject(),
            ip_address = ?event.ip_address(),
            event = %payload,
            "{}",
            event.summary()
        );
    }
}

/// Client address from proxy headers
///
/// Takes the first hop of `X-Forwarded-For`, falling back to `X-Real-IP`.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .map(str::to_string)
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: 42,
            email: "test@example.com".to_string(),
            device_id: "dev-A".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "login_success");
        assert_eq!(json["user_id"], 42);
        assert_eq!(json["device_id"], "dev-A");
    }

    #[test]
    fn test_event_accessors() {
        let denied = AuditEvent::AccessDenied {
            user_id: Some(7),
            resource: "/api/v1/admin/ping".to_string(),
            required_role: Some("admin".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
        };
        assert_eq!(denied.subject(), Some(7));
        assert_eq!(denied.ip_address(), Some("10.0.0.1"));
        assert!(denied.is_rejection());

        let logout = AuditEvent::Logout {
            user_id: 42,
            device_id: "dev-A".to_string(),
            ip_address: None,
        };
        assert_eq!(logout.summary(), "User logout");
        assert!(!logout.is_rejection());
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(&AuditEvent::LoginFailure {
            email: "test@example.com".to_string(),
            reason: "bad_password".to_string(),
            ip_address: None,
            user_agent: None,
        });
        audit_log(&AuditEvent::TokensRevoked {
            user_id: 42,
            device_id: Some("dev-A".to_string()),
            revoked_by: None,
            ip_address: None,
        });
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_blank_forwarded_header_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", " ".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.7".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("198.51.100.7".to_string()));
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = HeaderMap::new();

        assert_eq!(extract_ip_address(&headers), None);
        assert_eq!(extract_user_agent(&headers), None);
    }
}
