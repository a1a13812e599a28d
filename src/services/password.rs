//! Password hashing and random tokens
//!
//! Argon2id with the crate's default parameters and a fresh salt per hash,
//! stored as a PHC string. Session and CSRF tokens are hex encoded bytes
//! from the OS random source.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, Error as HashError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

pub const MIN_PASSWORD_LENGTH: usize = 8;
/// Bounds the hashing work a single login request can cause
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Hash a password into a PHC string (`$argon2id$...`)
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("Failed to hash password: {}", e))
}

/// `Ok(false)` for a wrong password, `Err` only for a corrupt stored hash
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|e| anyhow!("Stored password hash is invalid: {}", e))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(HashError::Password) => Ok(false),
        Err(e) => Err(anyhow!("Password verification failed: {}", e)),
    }
}

/// Rules for new passwords. The error is shown to the user as is.
pub fn validate_password_strength(password: &str) -> Result<(), &'static str> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err("Password must be at least 8 characters long");
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err("Password must be at most 128 characters long");
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err("Password must contain at least one letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit");
    }
    Ok(())
}

/// Random hex token of `bytes` bytes
pub fn generate_token(bytes: usize) -> Result<String> {
    let mut buf = vec![0u8; bytes];
    getrandom::fill(&mut buf).map_err(|e| anyhow!("Random source failed: {}", e))?;
    Ok(data_encoding::HEXLOWER.encode(&buf))
}
