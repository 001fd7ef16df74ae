//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::{
    AuthService, AuthenticatedUser, PasswordConfig, RequestAuthenticator, SessionRegistry,
    TokenCodec,
};
use std::sync::Arc;
use std::time::Instant;
use tollgate_core::config::AppConfig;
use tollgate_core::{KeyValueStore, UserDirectory};

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    pub codec: Arc<TokenCodec>,
    pub registry: SessionRegistry,
    pub authenticator: RequestAuthenticator,
    pub auth_service: AuthService,
}

impl AppState {
    /// Wire the auth components over a session store and user directory
    pub fn new(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self::with_password_config(config, store, directory, PasswordConfig::default())
    }

    pub fn with_password_config(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        directory: Arc<dyn UserDirectory>,
        password_config: PasswordConfig,
    ) -> Self {
        let codec = Arc::new(TokenCodec::new(&config.jwt));
        let registry = SessionRegistry::new(store);
        let authenticator = RequestAuthenticator::new(codec.clone(), registry.clone());
        let auth_service = AuthService::new(directory, codec.clone(), registry.clone())
            .with_password_config(password_config);

        Self {
            config,
            start_time: Instant::now(),
            codec,
            registry,
            authenticator,
            auth_service,
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Whether the caller may manage sessions of `target_user_id`
    pub fn may_manage_sessions_of(&self, caller: &AuthenticatedUser, target_user_id: i64) -> bool {
        caller.user_id() == target_user_id || self.config.auth.is_admin_role(caller.role())
    }
}
