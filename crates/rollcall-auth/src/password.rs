//! Account passwords
//!
//! Stored as argon2id PHC strings. A login for an unknown username still
//! runs one verification so it costs the same as a wrong password.

use std::sync::OnceLock;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rollcall_core::{Error, Result};

/// Shortest password accepted at provisioning
pub const MIN_PASSWORD_LEN: usize = 8;

/// Reject passwords too short to provision
pub fn check_length(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Hash a password with a fresh salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))
}

/// Check a password against an account's stored hash.
///
/// A stored value that is not a PHC string is an `Internal` error, not a
/// failed login.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| Error::Internal(format!("stored password hash unreadable: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Spend one verification on a login for an account that does not exist
pub fn verify_unknown_account(password: &str) {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    let dummy = DUMMY.get_or_init(|| hash_password("rollcall-unknown-account").ok());
    if let Some(stored) = dummy {
        let _ = verify_password(password, stored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn test_salted() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn test_unreadable_hash_is_internal() {
        let result = verify_password("x", "not-a-phc-string");
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn test_check_length() {
        assert!(matches!(check_length("short"), Err(Error::Validation(_))));
        assert!(check_length("12345678").is_ok());
        // Counted in characters, not bytes
        assert!(check_length("ééééééé").is_err());
    }

    #[test]
    fn test_unknown_account_verification_runs() {
        verify_unknown_account("anything");
        verify_unknown_account("anything else");
    }
}
