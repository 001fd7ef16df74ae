//! Session registry
//!
//! Revocation markers over a [`KeyValueStore`]. Three independent namespaces:
//!
//! | key | value | TTL |
//! |---|---|---|
//! | `blacklist:<token>` | `"true"` | remaining token lifetime |
//! | `revoke:user:<user_id>` | revocation time (Unix milliseconds) | 7 days |
//! | `revoke:user:<user_id>:device:<device_id>` | `"true"` | 7 days |
//!
//! A marker's absence means "not revoked", never "valid". Expiry belongs to
//! the store. Nothing here retries; callers decide whether a store failure is
//! fatal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::{KeyValueStore, StoreError};

/// Retention window for user-wide and per-device markers
pub const REVOCATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const MARKER_VALUE: &str = "true";

/// Identifies one revocation marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationKey<'a> {
    /// A single blacklisted token
    Token(&'a str),
    /// Every token of a user issued up to the marker's timestamp
    User(i64),
    /// Every token of a user on one device
    Device { user_id: i64, device_id: &'a str },
}

impl RevocationKey<'_> {
    /// Key as written to the store
    pub fn storage_key(&self) -> String {
        match self {
            RevocationKey::Token(token) => format!("blacklist:{token}"),
            RevocationKey::User(user_id) => format!("revoke:user:{user_id}"),
            RevocationKey::Device { user_id, device_id } => {
                format!("revoke:user:{user_id}:device:{device_id}")
            }
        }
    }

    fn namespace(&self) -> &'static str {
        match self {
            RevocationKey::Token(_) => "blacklist",
            RevocationKey::User(_) => "revoke:user",
            RevocationKey::Device { .. } => "revoke:user:device",
        }
    }
}

impl fmt::Display for RevocationKey<'_> {
    // Tokens are credentials: never print them whole
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevocationKey::Token(token) => {
                let tail = token.get(token.len().saturating_sub(8)..).unwrap_or_default();
                write!(f, "blacklist:…{tail}")
            }
            other => f.write_str(&other.storage_key()),
        }
    }
}

/// State of the user-wide marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRevocation {
    /// Tokens issued at or before this Unix time (milliseconds) are void
    Since(u64),
    /// The marker is present but unreadable; every token is void
    Unbounded,
}

impl UserRevocation {
    fn parse(value: &str) -> Self {
        value
            .trim()
            .parse()
            .map(UserRevocation::Since)
            .unwrap_or(UserRevocation::Unbounded)
    }

    /// Whether a token issued at `issued_at_ms` is void under this marker
    pub fn voids(&self, issued_at_ms: u64) -> bool {
        match self {
            UserRevocation::Since(revoked_at_ms) => issued_at_ms <= *revoked_at_ms,
            UserRevocation::Unbounded => true,
        }
    }
}

/// Revocation markers backed by a shared key-value store
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Write a marker. Idempotent; overwriting resets the TTL.
    pub async fn mark_revoked(&self, key: RevocationKey<'_>, ttl: Duration) -> Result<(), StoreError> {
        self.write(key, MARKER_VALUE, ttl).await
    }

    /// Whether a marker is present
    pub async fn is_revoked(&self, key: RevocationKey<'_>) -> Result<bool, StoreError> {
        let present = self.store.get(&key.storage_key()).await?.is_some();
        tracing::debug!(namespace = key.namespace(), key = %key, present, "Revocation lookup");
        Ok(present)
    }

    /// Delete a marker; a missing marker is not an error
    pub async fn clear(&self, key: RevocationKey<'_>) -> Result<(), StoreError> {
        self.store.delete(&key.storage_key()).await?;
        tracing::debug!(namespace = key.namespace(), key = %key, "Revocation marker cleared");
        Ok(())
    }

    /// Read the user-wide marker
    pub async fn user_revoked_since(&self, user_id: i64) -> Result<Option<UserRevocation>, StoreError> {
        let key = RevocationKey::User(user_id);
        let value = self.store.get(&key.storage_key()).await?;
        tracing::debug!(namespace = key.namespace(), key = %key, present = value.is_some(), "Revocation lookup");
        Ok(value.as_deref().map(UserRevocation::parse))
    }

    /// Void every token of `user_id` issued up to `revoked_at_ms`
    pub async fn revoke_user(&self, user_id: i64, revoked_at_ms: u64) -> Result<(), StoreError> {
        self.write(
            RevocationKey::User(user_id),
            &revoked_at_ms.to_string(),
            REVOCATION_TTL,
        )
        .await
    }

    /// Void every token of `user_id` on `device_id`
    pub async fn revoke_device(&self, user_id: i64, device_id: &str) -> Result<(), StoreError> {
        self.mark_revoked(RevocationKey::Device { user_id, device_id }, REVOCATION_TTL)
            .await
    }

    /// Check the backing store is reachable
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    async fn write(&self, key: RevocationKey<'_>, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let ttl = whole_seconds(ttl);
        self.store.set(&key.storage_key(), value, ttl).await?;
        tracing::debug!(
            namespace = key.namespace(),
            key = %key,
            ttl_secs = ttl.as_secs(),
            "Revocation marker written"
        );
        Ok(())
    }
}

/// Round up to whole seconds, never below one
fn whole_seconds(ttl: Duration) -> Duration {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    Duration::from_secs(secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::MemoryStore;

    fn registry() -> (SessionRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SessionRegistry::new(store.clone()), store)
    }

    #[test]
    fn test_storage_keys() {
        assert_eq!(RevocationKey::Token("abc.def.ghi").storage_key(), "blacklist:abc.def.ghi");
        assert_eq!(RevocationKey::User(42).storage_key(), "revoke:user:42");
        assert_eq!(
            RevocationKey::Device {
                user_id: 42,
                device_id: "dev-A"
            }
            .storage_key(),
            "revoke:user:42:device:dev-A"
        );
    }

    #[test]
    fn test_token_key_display_is_truncated() {
        let shown = RevocationKey::Token("header.payload.signature-tail").to_string();
        assert_eq!(shown, "blacklist:…ure-tail");
    }

    #[test]
    fn test_whole_seconds() {
        assert_eq!(whole_seconds(Duration::ZERO), Duration::from_secs(1));
        assert_eq!(whole_seconds(Duration::from_millis(200)), Duration::from_secs(1));
        assert_eq!(whole_seconds(Duration::from_millis(2001)), Duration::from_secs(3));
        assert_eq!(whole_seconds(REVOCATION_TTL), REVOCATION_TTL);
    }

    #[test]
    fn test_user_revocation_window() {
        let since = UserRevocation::Since(1_700_000_000_500);
        assert!(since.voids(1_700_000_000_499));
        assert!(since.voids(1_700_000_000_500));
        // Later in the same second is still live
        assert!(!since.voids(1_700_000_000_501));
        assert!(UserRevocation::Unbounded.voids(u64::MAX));

        assert_eq!(UserRevocation::parse("1700000000500"), since);
        assert_eq!(UserRevocation::parse("true"), UserRevocation::Unbounded);
    }

    #[tokio::test]
    async fn test_mark_check_clear() {
        let (registry, _) = registry();
        let key = RevocationKey::Device {
            user_id: 7,
            device_id: "laptop",
        };

        assert!(!registry.is_revoked(key).await.unwrap());
        registry.mark_revoked(key, REVOCATION_TTL).await.unwrap();
        registry.mark_revoked(key, REVOCATION_TTL).await.unwrap();
        assert!(registry.is_revoked(key).await.unwrap());

        registry.clear(key).await.unwrap();
        assert!(!registry.is_revoked(key).await.unwrap());
        registry.clear(key).await.unwrap();
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let (registry, store) = registry();
        registry.revoke_device(7, "laptop").await.unwrap();

        assert!(!registry.is_revoked(RevocationKey::User(7)).await.unwrap());
        assert!(!registry
            .is_revoked(RevocationKey::Device {
                user_id: 7,
                device_id: "phone"
            })
            .await
            .unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_revoke_user_records_timestamp() {
        let (registry, store) = registry();
        assert_eq!(registry.user_revoked_since(42).await.unwrap(), None);

        registry.revoke_user(42, 1_700_000_000_250).await.unwrap();
        assert_eq!(
            registry.user_revoked_since(42).await.unwrap(),
            Some(UserRevocation::Since(1_700_000_000_250))
        );

        // A legacy boolean marker fails closed
        store
            .set("revoke:user:43", "true", REVOCATION_TTL)
            .await
            .unwrap();
        assert_eq!(
            registry.user_revoked_since(43).await.unwrap(),
            Some(UserRevocation::Unbounded)
        );
    }

    #[tokio::test]
    async fn test_blacklist_expires_with_token() {
        let (registry, _) = registry();
        let key = RevocationKey::Token("short-lived");

        registry
            .mark_revoked(key, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(registry.is_revoked(key).await.unwrap());

        // Rounded up to one second
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!registry.is_revoked(key).await.unwrap());
    }
}
