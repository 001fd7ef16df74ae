//! JWT token generation and validation
//!
//! Two token classes are issued, each signed with HMAC-SHA256 under its own
//! secret. The refresh secret is derived from the base secret so a token of
//! one class never verifies as the other.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tollgate_core::JwtConfig;
use uuid::Uuid;

/// Refresh tokens live for 7 days regardless of configuration
pub const REFRESH_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Appended to the base secret to form the refresh signing secret
pub const REFRESH_SECRET_SUFFIX: &str = "_refresh";

/// Token class carried in the `type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenClass::Access => f.write_str("access"),
            TokenClass::Refresh => f.write_str("refresh"),
        }
    }
}

/// JWT Claims structure
///
/// Immutable once signed. Decoded and validated in one step by [`TokenCodec::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Opaque server-side key
    pub sub: String,
    pub user_id: i64,
    pub device_id: String,
    pub role: String,
    /// Issued at (Unix epoch seconds)
    pub iat: u64,
    /// Issued at (Unix epoch milliseconds), compared against user-wide revocations
    ///
    /// Tokens minted without it decode as issued at the epoch.
    #[serde(default)]
    pub iat_ms: u64,
    /// Expiration (Unix epoch seconds)
    pub exp: u64,
    #[serde(rename = "type")]
    pub token_class: TokenClass,
    /// Token issuer
    pub iss: String,
    /// JWT ID - unique per issued token
    pub jti: String,
}

impl Claims {
    /// Seconds until expiry, zero once expired
    pub fn remaining_secs(&self, now: u64) -> u64 {
        self.exp.saturating_sub(now)
    }
}

/// Identity fields embedded into every issued token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub user_id: i64,
    pub device_id: String,
    pub role: String,
}

impl From<&Claims> for TokenIdentity {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.user_id,
            device_id: claims.device_id.clone(),
            role: claims.role.clone(),
        }
    }
}

/// A freshly signed token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Expiration (Unix epoch seconds)
    pub expires_at: u64,
    /// Lifetime in seconds
    pub expires_in: u64,
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token format")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Expected {expected} token, got {found}")]
    WrongClass {
        expected: TokenClass,
        found: TokenClass,
    },

    #[error("Token lifetime of {0}s overflows the expiry claim")]
    LifetimeOverflow(u64),

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Issues and verifies access and refresh tokens
///
/// Built once from [`JwtConfig`] at startup and shared through the app state.
pub struct TokenCodec {
    access: SigningKeys,
    refresh: SigningKeys,
    subject_key: String,
    issuer: String,
    access_ttl_secs: u64,
}

impl TokenCodec {
    pub fn new(config: &JwtConfig) -> Self {
        let refresh_secret = format!("{}{REFRESH_SECRET_SUFFIX}", config.secret);
        Self {
            access: SigningKeys::from_secret(config.secret.as_bytes()),
            refresh: SigningKeys::from_secret(refresh_secret.as_bytes()),
            subject_key: config.subject_key.clone(),
            issuer: config.issuer.clone(),
            access_ttl_secs: config.access_expiration_secs,
        }
    }

    /// Lifetime of tokens of the given class, in seconds
    pub fn ttl_secs(&self, class: TokenClass) -> u64 {
        match class {
            TokenClass::Access => self.access_ttl_secs,
            TokenClass::Refresh => REFRESH_TOKEN_TTL_SECS,
        }
    }

    fn keys(&self, class: TokenClass) -> &SigningKeys {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }

    /// Issue a token of `class` for `identity`
    pub fn issue(&self, identity: &TokenIdentity, class: TokenClass) -> Result<IssuedToken, JwtError> {
        let now_ms = unix_now_ms()?;
        let now = now_ms / 1000;
        let expires_in = self.ttl_secs(class);
        let exp = now
            .checked_add(expires_in)
            .ok_or(JwtError::LifetimeOverflow(expires_in))?;

        let claims = Claims {
            sub: self.subject_key.clone(),
            user_id: identity.user_id,
            device_id: identity.device_id.clone(),
            role: identity.role.clone(),
            iat: now,
            iat_ms: now_ms,
            exp,
            token_class: class,
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        Ok(IssuedToken {
            token: self.sign(&claims)?,
            expires_at: claims.exp,
            expires_in,
        })
    }

    /// Sign arbitrary claims with the key of their own class
    pub fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        let token = encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.keys(claims.token_class).encoding,
        )?;
        Ok(token)
    }

    /// Verify signature, issuer, expiry and class
    pub fn verify(&self, token: &str, class: TokenClass) -> Result<Claims, JwtError> {
        let claims = self.decode_checked(token, class, true)?;

        // The library accepts exp == now; a token is only live while exp > now
        if claims.exp <= unix_now()? {
            return Err(JwtError::ExpiredToken);
        }
        Ok(claims)
    }

    /// Like [`verify`](Self::verify) but tolerates an expired token
    ///
    /// Logout uses this so an already-expired token still identifies its device.
    pub fn inspect(&self, token: &str, class: TokenClass) -> Result<Claims, JwtError> {
        self.decode_checked(token, class, false)
    }

    fn decode_checked(
        &self,
        token: &str,
        class: TokenClass,
        validate_exp: bool,
    ) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = validate_exp;
        validation.set_issuer(&[&self.issuer]);

        let token_data = decode::<Claims>(token, &self.keys(class).decoding, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::InvalidToken,
            })?;

        let claims = token_data.claims;
        if claims.token_class != class {
            return Err(JwtError::WrongClass {
                expected: class,
                found: claims.token_class,
            });
        }
        Ok(claims)
    }
}

/// Current Unix time in seconds
pub fn unix_now() -> Result<u64, JwtError> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Current Unix time in milliseconds
pub fn unix_now_ms() -> Result<u64, JwtError> {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    Ok(u64::try_from(millis).unwrap_or(u64::MAX))
}
