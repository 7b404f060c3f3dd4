//! Password and profile field rules.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use super::AuthError;

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum password length (argon2 input stays bounded).
const MAX_PASSWORD_LENGTH: usize = 128;

/// Maximum display name length, in characters.
const MAX_NAME_LENGTH: usize = 100;

/// Validate password meets requirements.
pub(crate) fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "password must be at most {MAX_PASSWORD_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Trimmed display name, 1 to 100 characters.
pub(crate) fn validate_name(name: &str) -> Result<String, AuthError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuthError::Validation("name is required".to_owned()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AuthError::Validation(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_owned())
}

/// Optional phone number; blank means absent.
pub(crate) fn normalize_phone(phone: Option<&str>) -> Result<Option<String>, AuthError> {
    let Some(phone) = phone.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    let valid = phone.len() <= 20
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
    if !valid {
        return Err(AuthError::Validation("phone number is invalid".to_owned()));
    }
    Ok(Some(phone.to_owned()))
}

/// Hash a password using Argon2id.
pub(crate) fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
pub(crate) fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).is_ok());
        assert!(matches!(
            verify_password("wrong horse", &hash),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_empty_hash_never_verifies() {
        assert!(verify_password("anything", "").is_err());
    }

    #[test]
    fn test_password_length_rules() {
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_name_rules() {
        assert_eq!(validate_name("  Aki ").unwrap(), "Aki");
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"名".repeat(100)).is_ok());
        assert!(validate_name(&"名".repeat(101)).is_err());
    }

    #[test]
    fn test_phone_rules() {
        assert_eq!(normalize_phone(None).unwrap(), None);
        assert_eq!(normalize_phone(Some("  ")).unwrap(), None);
        assert_eq!(
            normalize_phone(Some("+81 90-1234-5678")).unwrap().as_deref(),
            Some("+81 90-1234-5678")
        );
        assert!(normalize_phone(Some("call me")).is_err());
    }
}
