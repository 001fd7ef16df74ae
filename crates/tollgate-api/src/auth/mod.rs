//! Authentication and session revocation
//!
//! - Token issuance and verification (access and refresh classes)
//! - Password hashing with Argon2
//! - Device identity resolution
//! - Session registry: blacklist, user-wide and per-device revocation markers
//! - Request authenticator and axum middleware
//! - Authentication service orchestrating the operations above

pub mod device;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod registry;
pub mod service;

pub use device::resolve_device_id;
pub use error::{AuthError, RevocationScope};
pub use jwt::{Claims, IssuedToken, JwtError, TokenClass, TokenCodec, TokenIdentity};
pub use middleware::{auth_middleware, require_any_role, AuthenticatedUser, RequestAuthenticator};
pub use password::{hash_password, validate_password_strength, verify_password, PasswordConfig};
pub use registry::{RevocationKey, SessionRegistry, UserRevocation, REVOCATION_TTL};
pub use service::{
    AuthResponse, AuthService, AuthWarning, ClientContext, LoginRequest, RefreshRequest,
    RefreshResponse, RegisterRequest, RevokeDeviceRequest, UserInfo,
};
