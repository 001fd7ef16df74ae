//! Authentication service layer
//!
//! Orchestrates login, registration, logout, refresh and revocation over the
//! user directory, the token codec and the session registry.
//!
//! Steps that are not safety requirements (lifting a device logout on login,
//! blacklisting the access token replaced by a refresh) never fail the
//! operation. They report an [`AuthWarning`] on the response instead.

use super::device::{resolve_device_id, MAX_DEVICE_ID_LEN};
use super::error::{AuthError, RevocationScope};
use super::jwt::{unix_now, unix_now_ms, Claims, JwtError, TokenClass, TokenCodec, TokenIdentity};
use super::password::{
    hash_password_with_config, validate_password_strength, verify_password_or_decoy,
    PasswordConfig,
};
use super::registry::{RevocationKey, SessionRegistry};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tollgate_core::{DirectoryError, NewUser, UserDirectory, UserProfile, DEFAULT_ROLE};
use utoipa::ToSchema;
use validator::Validate;

const TOKEN_TYPE: &str = "Bearer";

/// Plaintext behind the decoy hash checked for unknown accounts
const DECOY_PASSWORD: &str = "tollgate-decoy-credential";

/// Request metadata used for device fingerprinting and audit records
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl ClientContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            user_agent: extract_user_agent(headers),
            ip_address: extract_ip_address(headers),
        }
    }
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    /// Stable client device id; derived from the request when absent
    #[validate(length(max = 64, message = "Device id must be at most 64 characters"))]
    pub device_id: Option<String>,
}

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 100, message = "Short name must be 1-100 characters"))]
    pub short_name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(range(min = 0, max = 150, message = "Age must be between 0 and 150"))]
    pub age: i32,
    pub password: String,
    pub organization_id: Option<i64>,
    #[validate(length(max = 64, message = "Device id must be at most 64 characters"))]
    pub device_id: Option<String>,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
    /// Access token being replaced; blacklisted on a best-effort basis
    pub old_access_token: Option<String>,
}

/// Device revocation request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RevokeDeviceRequest {
    #[validate(length(min = 1, max = 64, message = "Device id must be 1-64 characters"))]
    pub device_id: String,
}

/// Public user information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: i64,
    pub name: String,
    pub short_name: String,
    pub email: String,
    pub age: i32,
    pub role: String,
    pub organization_id: Option<i64>,
}

impl From<UserProfile> for UserInfo {
    fn from(user: UserProfile) -> Self {
        Self {
            id: user.id,
            name: user.name,
            short_name: user.short_name,
            email: user.email,
            age: user.age,
            role: user.role,
            organization_id: user.organization_id,
        }
    }
}

/// Non-fatal failure of a best-effort step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthWarning {
    #[error("failed to clear device revocation: {0}")]
    DeviceClearFailed(String),

    #[error("old access token rejected: {0}")]
    OldTokenRejected(String),

    #[error("old access token belongs to another user")]
    OldTokenUserMismatch,

    #[error("failed to blacklist old access token: {0}")]
    OldTokenBlacklistFailed(String),
}

/// Tokens and profile returned by login and registration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub user: UserInfo,
    pub device_id: String,
    #[serde(skip)]
    pub warnings: Vec<AuthWarning>,
}

/// New access token returned by refresh
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    /// Expiration (Unix epoch seconds)
    pub expires_at: u64,
    #[serde(skip)]
    pub warnings: Vec<AuthWarning>,
}

fn validation_error(err: validator::ValidationErrors) -> AuthError {
    AuthError::Validation(err.to_string())
}

fn upstream(err: DirectoryError) -> AuthError {
    AuthError::UpstreamFailure(err.to_string())
}

fn now() -> Result<u64, AuthError> {
    unix_now().map_err(|e| AuthError::Internal(e.to_string()))
}

/// Authentication service
pub struct AuthService {
    directory: Arc<dyn UserDirectory>,
    codec: Arc<TokenCodec>,
    registry: SessionRegistry,
    password_config: PasswordConfig,
    /// Hashed on first use with `password_config`
    decoy_hash: OnceCell<String>,
}

impl AuthService {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        codec: Arc<TokenCodec>,
        registry: SessionRegistry,
    ) -> Self {
        Self {
            directory,
            codec,
            registry,
            password_config: PasswordConfig::default(),
            decoy_hash: OnceCell::new(),
        }
    }

    /// Override the Argon2 parameters used for new password hashes
    pub fn with_password_config(mut self, config: PasswordConfig) -> Self {
        self.password_config = config;
        self.decoy_hash = OnceCell::new();
        self
    }

    /// Hash checked in place of a missing credential
    async fn decoy_hash(&self) -> Result<&str, AuthError> {
        let hash = self
            .decoy_hash
            .get_or_try_init(|| async {
                let config = self.password_config.clone();
                tokio::task::spawn_blocking(move || hash_password_with_config(DECOY_PASSWORD, &config))
                    .await
                    .map_err(|e| AuthError::Internal(format!("Password hashing task failed: {e}")))?
                    .map_err(|e| AuthError::Internal(e.to_string()))
            })
            .await?;
        Ok(hash.as_str())
    }

    /// Login with email and password
    pub async fn login(
        &self,
        request: LoginRequest,
        ctx: &ClientContext,
    ) -> Result<AuthResponse, AuthError> {
        request.validate().map_err(validation_error)?;

        let device_id = resolve_device_id(
            request.device_id.as_deref(),
            ctx.user_agent.as_deref(),
            ctx.ip_address.as_deref(),
        );

        let login_failure = |reason: &str| {
            audit_log(&AuditEvent::LoginFailure {
                email: request.email.clone(),
                reason: reason.to_string(),
                ip_address: ctx.ip_address.clone(),
                user_agent: ctx.user_agent.clone(),
            });
            AuthError::InvalidCredentials
        };

        let user = self
            .directory
            .find_by_email(&request.email)
            .await
            .map_err(upstream)?;
        let hash = match &user {
            Some(user) => self.directory.password_hash(user.id).await.map_err(upstream)?,
            None => None,
        };

        // Every failure path pays for one Argon2 verification
        let password = request.password.clone();
        let stored = hash.clone();
        let decoy = self.decoy_hash().await?.to_string();
        let valid = tokio::task::spawn_blocking(move || {
            verify_password_or_decoy(&password, stored.as_deref(), &decoy)
        })
        .await
        .map_err(|e| AuthError::Internal(format!("Password verification task failed: {e}")))?
        .map_err(|e| {
            tracing::error!(email = %request.email, error = %e, "Stored password hash is unusable");
            AuthError::Internal(e.to_string())
        })?;

        let user = match (user, hash) {
            (None, _) => return Err(login_failure("unknown_email")),
            (Some(_), None) => return Err(login_failure("missing_credential")),
            (Some(_), Some(_)) if !valid => return Err(login_failure("bad_password")),
            (Some(user), Some(_)) => user,
        };

        let response = self.open_session(user, device_id).await?;

        audit_log(&AuditEvent::LoginSuccess {
            user_id: response.user.id,
            email: response.user.email.clone(),
            device_id: response.device_id.clone(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        });

        Ok(response)
    }

    /// Register a new user and log them in
    ///
    /// New accounts always get the default `user` role.
    pub async fn register(
        &self,
        request: RegisterRequest,
        ctx: &ClientContext,
    ) -> Result<AuthResponse, AuthError> {
        let result = self.register_inner(request.clone(), ctx).await;

        match &result {
            Ok(response) => audit_log(&AuditEvent::RegistrationSuccess {
                user_id: response.user.id,
                email: response.user.email.clone(),
                role: response.user.role.clone(),
                ip_address: ctx.ip_address.clone(),
                user_agent: ctx.user_agent.clone(),
            }),
            Err(e) => audit_log(&AuditEvent::RegistrationFailure {
                email: request.email,
                reason: e.to_string(),
                ip_address: ctx.ip_address.clone(),
                user_agent: ctx.user_agent.clone(),
            }),
        }

        result
    }

    async fn register_inner(
        &self,
        request: RegisterRequest,
        ctx: &ClientContext,
    ) -> Result<AuthResponse, AuthError> {
        request.validate().map_err(validation_error)?;
        validate_password_strength(&request.password).map_err(AuthError::Validation)?;

        if self
            .directory
            .email_exists(&request.email)
            .await
            .map_err(upstream)?
        {
            return Err(AuthError::EmailTaken);
        }

        let password = request.password;
        let config = self.password_config.clone();
        let password_hash =
            tokio::task::spawn_blocking(move || hash_password_with_config(&password, &config))
                .await
                .map_err(|e| AuthError::Internal(format!("Password hashing task failed: {e}")))?
                .map_err(|e| AuthError::Internal(e.to_string()))?;

        let user = self
            .directory
            .create_user(NewUser {
                name: request.name,
                short_name: request.short_name,
                email: request.email,
                age: request.age,
                password_hash,
                role: DEFAULT_ROLE.to_string(),
                organization_id: request.organization_id,
            })
            .await
            .map_err(|e| match e {
                DirectoryError::EmailTaken(_) => AuthError::EmailTaken,
                other => upstream(other),
            })?;

        let device_id = resolve_device_id(
            request.device_id.as_deref(),
            ctx.user_agent.as_deref(),
            ctx.ip_address.as_deref(),
        );

        self.open_session(user, device_id).await
    }

    /// Issue both tokens and lift any earlier logout of the device
    async fn open_session(
        &self,
        user: UserProfile,
        device_id: String,
    ) -> Result<AuthResponse, AuthError> {
        let identity = TokenIdentity {
            user_id: user.id,
            device_id,
            role: user.role.clone(),
        };

        let access = self
            .codec
            .issue(&identity, TokenClass::Access)
            .map_err(|e| AuthError::Internal(format!("Failed to issue access token: {e}")))?;
        let refresh = self
            .codec
            .issue(&identity, TokenClass::Refresh)
            .map_err(|e| AuthError::Internal(format!("Failed to issue refresh token: {e}")))?;

        let mut warnings = Vec::new();
        let device = RevocationKey::Device {
            user_id: identity.user_id,
            device_id: &identity.device_id,
        };
        if let Err(e) = self.registry.clear(device).await {
            tracing::warn!(
                user_id = identity.user_id,
                device_id = %identity.device_id,
                error = %e,
                "Failed to clear device revocation on login"
            );
            warnings.push(AuthWarning::DeviceClearFailed(e.to_string()));
        }

        Ok(AuthResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: access.expires_in,
            user: user.into(),
            device_id: identity.device_id,
            warnings,
        })
    }

    /// Log out the device an access token was issued to
    ///
    /// The token is blacklisted for its remaining lifetime and the device is
    /// revoked, which also stops its refresh token. An expired token still
    /// logs its device out. Returns the token's claims.
    pub async fn logout(&self, access_token: &str) -> Result<Claims, AuthError> {
        let claims = self.codec.inspect(access_token, TokenClass::Access)?;

        let remaining = claims.remaining_secs(now()?);
        if remaining > 0 {
            self.registry
                .mark_revoked(
                    RevocationKey::Token(access_token),
                    Duration::from_secs(remaining),
                )
                .await?;
        }

        self.registry
            .revoke_device(claims.user_id, &claims.device_id)
            .await?;

        tracing::info!(
            user_id = claims.user_id,
            device_id = %claims.device_id,
            "Device logged out"
        );
        Ok(claims)
    }

    /// Exchange a refresh token for a new access token
    ///
    /// The user-wide revocation marker is not consulted here; only the
    /// device marker is.
    pub async fn refresh(&self, request: RefreshRequest) -> Result<(Claims, RefreshResponse), AuthError> {
        request.validate().map_err(validation_error)?;

        let claims = match self.codec.verify(&request.refresh_token, TokenClass::Refresh) {
            Ok(claims) => claims,
            Err(JwtError::ExpiredToken) => return Err(AuthError::TokenExpired),
            Err(e) => return Err(AuthError::InvalidToken(e)),
        };

        let now = now()?;
        if claims.exp <= now {
            return Err(AuthError::TokenExpired);
        }
        if claims.token_class != TokenClass::Refresh {
            return Err(AuthError::InvalidToken(JwtError::WrongClass {
                expected: TokenClass::Refresh,
                found: claims.token_class,
            }));
        }

        let device = RevocationKey::Device {
            user_id: claims.user_id,
            device_id: &claims.device_id,
        };
        if self.registry.is_revoked(device).await? {
            return Err(AuthError::Revoked(RevocationScope::Device));
        }

        let mut warnings = Vec::new();
        if let Some(old) = request
            .old_access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
        {
            if let Err(warning) = self.retire_access_token(old, claims.user_id, now).await {
                tracing::warn!(user_id = claims.user_id, warning = %warning, "Old access token not rotated");
                warnings.push(warning);
            }
        }

        let access = self
            .codec
            .issue(&TokenIdentity::from(&claims), TokenClass::Access)
            .map_err(|e| AuthError::Internal(format!("Failed to issue access token: {e}")))?;

        let response = RefreshResponse {
            access_token: access.token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: access.expires_in,
            expires_at: access.expires_at,
            warnings,
        };
        Ok((claims, response))
    }

    async fn retire_access_token(
        &self,
        token: &str,
        user_id: i64,
        now: u64,
    ) -> Result<(), AuthWarning> {
        let old = self
            .codec
            .verify(token, TokenClass::Access)
            .map_err(|e| AuthWarning::OldTokenRejected(e.to_string()))?;

        if old.user_id != user_id {
            return Err(AuthWarning::OldTokenUserMismatch);
        }

        let remaining = old.remaining_secs(now);
        if remaining > 0 {
            self.registry
                .mark_revoked(RevocationKey::Token(token), Duration::from_secs(remaining))
                .await
                .map_err(|e| AuthWarning::OldTokenBlacklistFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Void every access token of `user_id` issued up to now
    ///
    /// Returns the recorded revocation time in Unix milliseconds.
    pub async fn revoke_all_tokens(&self, user_id: i64) -> Result<u64, AuthError> {
        let revoked_at_ms = unix_now_ms().map_err(|e| AuthError::Internal(e.to_string()))?;
        self.registry.revoke_user(user_id, revoked_at_ms).await?;
        tracing::info!(user_id, revoked_at_ms, "All tokens revoked for user");
        Ok(revoked_at_ms)
    }

    /// Void every token of `user_id` on `device_id`
    pub async fn revoke_device_tokens(&self, user_id: i64, device_id: &str) -> Result<(), AuthError> {
        if device_id.trim().is_empty() || device_id.chars().count() > MAX_DEVICE_ID_LEN {
            return Err(AuthError::Validation(format!(
                "Device id must be 1-{MAX_DEVICE_ID_LEN} characters"
            )));
        }
        self.registry.revoke_device(user_id, device_id).await?;
        tracing::info!(user_id, device_id, "Device tokens revoked");
        Ok(())
    }
}
