//! Device identity resolution
//!
//! A device id scopes logout and per-device revocation. Clients should send a
//! stable id; when they don't, one is derived from the request fingerprint.
//! Derived ids are salted with the current time, so they identify a single
//! session rather than a physical device.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest client-supplied device id accepted by request validation
pub const MAX_DEVICE_ID_LEN: usize = 64;

const FINGERPRINT_HEX_LEN: usize = 32;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Resolve the device id for a login or registration
///
/// Returns `client_supplied` verbatim when it is non-blank, otherwise a
/// 32-character lowercase hex fingerprint of user agent, IP and time.
pub fn resolve_device_id(
    client_supplied: Option<&str>,
    user_agent: Option<&str>,
    ip_address: Option<&str>,
) -> String {
    match client_supplied {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => fingerprint(user_agent.unwrap_or_default(), ip_address.unwrap_or_default()),
    }
}

fn fingerprint(user_agent: &str, ip_address: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    // Sequence keeps derived ids distinct on clocks with coarse resolution
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);

    let digest = Sha256::digest(format!("{user_agent}|{ip_address}|{nanos}|{seq}").as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(FINGERPRINT_HEX_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_supplied_id_is_kept_verbatim() {
        assert_eq!(
            resolve_device_id(Some("dev-A"), Some("curl/8.0"), Some("10.0.0.1")),
            "dev-A"
        );
        assert_eq!(resolve_device_id(Some(" phone "), None, None), " phone ");
    }

    #[test]
    fn test_blank_id_falls_back_to_fingerprint() {
        let id = resolve_device_id(Some("   "), Some("curl/8.0"), Some("10.0.0.1"));
        assert_eq!(id.len(), FINGERPRINT_HEX_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_derived_ids_differ_per_call() {
        let a = resolve_device_id(None, Some("curl/8.0"), Some("10.0.0.1"));
        let b = resolve_device_id(None, Some("curl/8.0"), Some("10.0.0.1"));
        assert_ne!(a, b);
    }
}
