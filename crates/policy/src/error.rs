//! Error types for the policy crate.

use thiserror::Error;

use crate::permission::Capability;

/// Policy error type covering credential, permission and path failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    // Credential errors
    /// Username or password was empty.
    #[error("username or password is empty")]
    CredentialMissing,

    /// No user record matches the supplied username.
    #[error("user not found: {username}")]
    UserNotFound {
        /// The username that was looked up.
        username: String,
    },

    /// The supplied password does not verify against the stored hash.
    #[error("password does not match for user {username}")]
    PasswordMismatch {
        /// The username whose password failed to verify.
        username: String,
    },

    /// The stored password hash could not be parsed.
    #[error("malformed password hash: {0}")]
    MalformedHash(String),

    /// The stored hash uses a scheme other than Argon2, such as bcrypt.
    #[error("unsupported password hash scheme {scheme:?}, re-hash the password with `davgate hash`")]
    UnsupportedHashScheme {
        /// The scheme identifier of the stored hash.
        scheme: String,
    },

    /// Generating a password hash failed.
    #[error("password hashing failed: {0}")]
    Hashing(String),

    // Permission errors
    /// Permission string is empty or longer than four characters.
    #[error("invalid permission string {value:?}: length must be between 1 and 4, got {len}")]
    InvalidPermissionString {
        /// The rejected string.
        value: String,
        /// Its length in characters.
        len: usize,
    },

    // Path errors
    /// The virtual path contains characters that are never valid.
    #[error("illegal path: {0:?}")]
    IllegalPath(String),

    // Authorization errors
    /// The identity does not hold the required capability.
    #[error("user {username:?} lacks the {capability} capability")]
    Forbidden {
        /// The user that was denied.
        username: String,
        /// The capability that was required.
        capability: Capability,
    },
}

impl PolicyError {
    /// Returns true for failures of the credential check itself.
    ///
    /// These are reported to the caller as a plain authentication challenge.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            PolicyError::CredentialMissing
                | PolicyError::UserNotFound { .. }
                | PolicyError::PasswordMismatch { .. }
                | PolicyError::MalformedHash(_)
                | PolicyError::UnsupportedHashScheme { .. }
        )
    }
}

/// Result type alias for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;

impl From<argon2::password_hash::Error> for PolicyError {
    fn from(err: argon2::password_hash::Error) -> Self {
        PolicyError::MalformedHash(err.to_string())
    }
}
