//! Password hashing and verification using Argon2id
//!
//! Stored hashes are PHC strings, so verification reads the algorithm,
//! parameters and salt from the hash itself and keeps working for hashes
//! produced with older parameters.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use thiserror::Error;

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 8;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// Argon2 cost parameters used for new hashes
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KB (default: 65536 = 64 MB)
    pub memory_cost: u32,
    /// Iterations (default: 3)
    pub time_cost: u32,
    /// Lanes (default: 4)
    pub parallelism: u32,
    /// Output length in bytes (default: 32)
    pub output_len: Option<usize>,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
            output_len: Some(32),
        }
    }
}

impl PasswordConfig {
    fn to_params(&self) -> Result<Params, PasswordError> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            self.output_len,
        )
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
    }
}

/// Hash a plaintext password with the default parameters
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    hash_password_with_config(password, &PasswordConfig::default())
}

/// Hash a password with custom parameters
pub fn hash_password_with_config(
    password: &str,
    config: &PasswordConfig,
) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        config.to_params()?,
    );

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Verify a plaintext password against a stored PHC hash
///
/// `Ok(false)` means the password does not match; `Err` means the stored
/// hash itself is unusable.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

/// Verify against the stored hash, or against `decoy` when there is none
///
/// Without a stored hash the same Argon2 work is done and the result is
/// always a mismatch.
pub fn verify_password_or_decoy(
    password: &str,
    stored: Option<&str>,
    decoy: &str,
) -> Result<bool, PasswordError> {
    match stored {
        Some(hash) => verify_password(password, hash),
        None => verify_password(password, decoy).map(|_| false),
    }
}

/// Character classes a registration password must contain
const REQUIRED_CLASSES: &[(&str, fn(char) -> bool)] = &[
    ("an uppercase letter", |c: char| c.is_uppercase()),
    ("a lowercase letter", |c: char| c.is_lowercase()),
    ("a digit", |c: char| c.is_ascii_digit()),
    ("a special character", |c: char| !c.is_alphanumeric()),
];

/// Check a new password against the registration policy
///
/// Reports the first unmet rule.
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        ));
    }

    match REQUIRED_CLASSES
        .iter()
        .find(|(_, matches)| !password.chars().any(*matches))
    {
        Some((class, _)) => Err(format!("Password must contain at least {class}")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light() -> PasswordConfig {
        PasswordConfig {
            memory_cost: 8192,
            time_cost: 1,
            parallelism: 1,
            output_len: Some(32),
        }
    }

    #[test]
    fn test_verify_accepts_only_the_hashed_password() {
        let hash = hash_password_with_config("Corr3ct!horse", &light()).unwrap();
        assert!(hash.starts_with("$argon2id$v=19$"));

        assert!(verify_password("Corr3ct!horse", &hash).unwrap());
        assert!(!verify_password("corr3ct!horse", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ_between_hashes() {
        let first = hash_password_with_config("Corr3ct!horse", &light()).unwrap();
        let second = hash_password_with_config("Corr3ct!horse", &light()).unwrap();

        assert_ne!(first, second);
        assert!(verify_password("Corr3ct!horse", &second).unwrap());
    }

    #[test]
    fn test_hash_made_with_other_parameters_still_verifies() {
        let hash = hash_password_with_config("Corr3ct!horse", &light()).unwrap();
        assert!(hash.contains("m=8192,t=1,p=1"));
        assert!(verify_password("Corr3ct!horse", &hash).unwrap());
    }

    #[test]
    fn test_garbage_hash_is_an_error_not_a_mismatch() {
        assert!(matches!(
            verify_password("anything", "plaintext-in-the-db"),
            Err(PasswordError::InvalidHashFormat)
        ));
    }

    #[test]
    fn test_missing_hash_verifies_against_decoy() {
        let decoy = hash_password_with_config("Corr3ct!horse", &light()).unwrap();

        // Even the decoy's own password never matches
        assert!(!verify_password_or_decoy("Corr3ct!horse", None, &decoy).unwrap());
        assert!(!verify_password_or_decoy("Wr0ng!horse", None, &decoy).unwrap());

        // The decoy really is parsed and checked
        assert!(matches!(
            verify_password_or_decoy("Corr3ct!horse", None, "not-a-phc-string"),
            Err(PasswordError::InvalidHashFormat)
        ));
    }

    #[test]
    fn test_stored_hash_takes_precedence_over_decoy() {
        let stored = hash_password_with_config("Corr3ct!horse", &light()).unwrap();

        assert!(verify_password_or_decoy("Corr3ct!horse", Some(&stored), "unused").unwrap());
        assert!(!verify_password_or_decoy("Wr0ng!horse", Some(&stored), "unused").unwrap());
    }

    #[test]
    fn test_strength_reports_first_missing_class() {
        assert!(validate_password_strength("Corr3ct!horse").is_ok());

        assert!(validate_password_strength("Sh0rt!")
            .unwrap_err()
            .contains("at least 8 characters"));
        assert_eq!(
            validate_password_strength("corr3ct!horse").unwrap_err(),
            "Password must contain at least an uppercase letter"
        );
        assert_eq!(
            validate_password_strength("CORR3CT!HORSE").unwrap_err(),
            "Password must contain at least a lowercase letter"
        );
        assert_eq!(
            validate_password_strength("Correct!horse").unwrap_err(),
            "Password must contain at least a digit"
        );
        assert_eq!(
            validate_password_strength("Corr3cthorse").unwrap_err(),
            "Password must contain at least a special character"
        );
    }
}
