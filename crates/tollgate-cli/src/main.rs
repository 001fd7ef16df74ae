//! Tollgate CLI - Session administration
//!
//! Usage:
//!   tollgate revoke-user <user_id>
//!   tollgate revoke-device <user_id> <device_id>
//!   tollgate restore-device <user_id> <device_id>
//!   tollgate status <user_id> [--device <device_id>]
//!   tollgate check-token <token>
//!   tollgate hash-password <password>

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use tollgate_api::audit::{audit_log, AuditEvent};
use tollgate_api::auth::jwt::unix_now_ms;
use tollgate_api::auth::{
    hash_password, validate_password_strength, RequestAuthenticator, RevocationKey,
    SessionRegistry, TokenCodec, UserRevocation,
};
use tollgate_core::config::AppConfig;
use tollgate_core::{KeyValueStore, MemoryStore, RedisStore, StoreBackend};

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Tollgate session administration CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Void every token of a user issued up to now
    RevokeUser {
        /// User id
        user_id: i64,
    },
    /// Void every token of a user on one device
    RevokeDevice { user_id: i64, device_id: String },
    /// Lift a device revocation
    RestoreDevice { user_id: i64, device_id: String },
    /// Show revocation markers for a user
    Status {
        user_id: i64,
        /// Also report this device's marker
        #[arg(long)]
        device: Option<String>,
    },
    /// Verify an access token against signature, expiry and revocations
    CheckToken { token: String },
    /// Hash a password for seeding the user directory
    HashPassword { password: String },
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis)
                .await
                .context("Failed to connect to Redis")?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("In-memory store selected, changes end with this process");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn describe_user_marker(marker: Option<UserRevocation>) -> serde_json::Value {
    match marker {
        None => json!(null),
        Some(UserRevocation::Since(revoked_at_ms)) => json!({ "revoked_at_ms": revoked_at_ms }),
        Some(UserRevocation::Unbounded) => json!({ "revoked_at_ms": "unreadable" }),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tollgate=info,tollgate_api=info,audit=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::HashPassword { password } = &cli.command {
        if let Err(reason) = validate_password_strength(password) {
            tracing::warn!(%reason, "Password is weaker than registration allows");
        }
        println!("{}", hash_password(password)?);
        return Ok(());
    }

    let config = AppConfig::load().context("Failed to load configuration")?;
    let registry = SessionRegistry::new(open_store(&config).await?);

    match cli.command {
        Commands::RevokeUser { user_id } => {
            let revoked_at_ms = unix_now_ms()?;
            registry.revoke_user(user_id, revoked_at_ms).await?;
            audit_log(&AuditEvent::TokensRevoked {
                user_id,
                device_id: None,
                revoked_by: None,
                ip_address: None,
            });
            println!("Revoked all tokens of user {user_id} issued at or before {revoked_at_ms}ms");
        }
        Commands::RevokeDevice { user_id, device_id } => {
            registry.revoke_device(user_id, &device_id).await?;
            audit_log(&AuditEvent::TokensRevoked {
                user_id,
                device_id: Some(device_id.clone()),
                revoked_by: None,
                ip_address: None,
            });
            println!("Revoked tokens of user {user_id} on device {device_id}");
        }
        Commands::RestoreDevice { user_id, device_id } => {
            registry
                .clear(RevocationKey::Device {
                    user_id,
                    device_id: &device_id,
                })
                .await?;
            println!("Cleared device revocation for user {user_id} on device {device_id}");
        }
        Commands::Status { user_id, device } => {
            let user = registry.user_revoked_since(user_id).await?;
            let device_status = match device.as_deref() {
                Some(device_id) => {
                    let revoked = registry
                        .is_revoked(RevocationKey::Device { user_id, device_id })
                        .await?;
                    json!({ "device_id": device_id, "revoked": revoked })
                }
                None => json!(null),
            };

            let report = json!({
                "user_id": user_id,
                "user_revocation": describe_user_marker(user),
                "device": device_status,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::CheckToken { token } => {
            let authenticator =
                RequestAuthenticator::new(Arc::new(TokenCodec::new(&config.jwt)), registry);
            let header = format!("Bearer {token}");
            match authenticator.authenticate(Some(&header), &[]).await {
                Ok(user) => {
                    let report = json!({
                        "valid": true,
                        "user_id": user.user_id(),
                        "device_id": user.device_id(),
                        "role": user.role(),
                        "expires_at": user.claims.exp,
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                Err(err) => {
                    let report = json!({
                        "valid": false,
                        "code": err.code(),
                        "reason": err.client_message(),
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }
        Commands::HashPassword { .. } => {}
    }

    Ok(())
}
