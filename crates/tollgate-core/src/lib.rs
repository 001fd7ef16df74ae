//! Tollgate Core - Domain models, traits, and shared types
//!
//! This crate defines the abstractions the authentication service is built on:
//! - User profile models
//! - The key-value store trait backing the session registry (Redis, in-memory)
//! - The user directory trait (PostgreSQL, in-memory)
//! - Configuration management

pub mod config;
pub mod directory;
pub mod store;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, JwtConfig, LoggingConfig, RateLimitConfig,
    RedisConfig, StoreBackend, StoreConfig,
};
pub use directory::{DirectoryError, MemoryUserDirectory, PgUserDirectory, UserDirectory};
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreError};

use serde::{Deserialize, Serialize};

// ============================================================================
// User Models
// ============================================================================

/// Role assigned to accounts created through registration
pub const DEFAULT_ROLE: &str = "user";

/// Public user profile returned alongside issued tokens
///
/// Owned by the user directory. The auth core never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Numeric user identifier
    pub id: i64,
    /// Display name
    pub name: String,
    /// Short display name
    pub short_name: String,
    /// Login email (unique)
    pub email: String,
    /// Age in years
    pub age: i32,
    /// Role embedded into issued tokens
    pub role: String,
    /// Owning organization, if any
    pub organization_id: Option<i64>,
}

/// Data needed to create a user record
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub short_name: String,
    pub email: String,
    pub age: i32,
    /// Already-hashed password (PHC string)
    pub password_hash: String,
    pub role: String,
    pub organization_id: Option<i64>,
}
