//! Password hashing and verification.
//!
//! Stored passwords are Argon2id hashes in PHC string format
//! (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`). Verification reads the cost
//! parameters from the stored string, so hashes produced with different
//! parameters keep verifying after the defaults change.

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::error::{PolicyError, Result};

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// Hash a password with the default Argon2id cost parameters.
pub fn hash_password(password: &str) -> Result<String> {
    hash_password_with_params(password, Params::default())
}

/// Hash a password with explicit Argon2id cost parameters.
pub fn hash_password_with_params(password: &str, params: Params) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| PolicyError::Hashing(e.to_string()))?;

    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let hash = hasher
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PolicyError::Hashing(e.to_string()))?;
    Ok(hash.to_string())
}

/// The scheme identifier of a `$scheme$...` hash string, if it has one.
///
/// `"$argon2id$v=19$..."` yields `argon2id`, a bcrypt `"$2a$10$..."` yields `2a`.
pub fn hash_scheme(stored_hash: &str) -> Option<&str> {
    let rest = stored_hash.strip_prefix('$')?;
    rest.split('$').next().filter(|scheme| !scheme.is_empty())
}

/// Whether the hash string uses a scheme [`verify_password`] understands.
pub fn is_supported_hash(stored_hash: &str) -> bool {
    matches!(
        hash_scheme(stored_hash),
        Some("argon2id" | "argon2i" | "argon2d")
    )
}

/// Verify a password against a stored PHC hash string.
///
/// Returns `Ok(false)` on mismatch. Hashes of another scheme fail with
/// [`PolicyError::UnsupportedHashScheme`] and unparseable strings with
/// [`PolicyError::MalformedHash`].
pub fn verify_password(stored_hash: &str, password: &str) -> Result<bool> {
    match hash_scheme(stored_hash) {
        Some(scheme) if !is_supported_hash(stored_hash) => {
            return Err(PolicyError::UnsupportedHashScheme {
                scheme: scheme.to_string(),
            });
        }
        _ => {}
    }
    let parsed = PasswordHash::new(stored_hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PolicyError::MalformedHash(e.to_string())),
    }
}
