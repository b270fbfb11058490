//! Credential verification.
//!
//! Turns a username/password pair into an [`Identity`] using the users of a
//! configuration snapshot. Every failure still yields an identity carrying the
//! attempted username so callers can log who tried to sign in.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use policy::{verify_password, Identity, PolicyError};
use thiserror::Error;

use crate::config::ServerConfig;

/// A failed authentication attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct AuthFailure {
    /// The unauthenticated identity of the caller.
    pub identity: Identity,
    /// Why authentication failed.
    #[source]
    pub reason: PolicyError,
}

impl AuthFailure {
    fn new(username: &str, reason: PolicyError) -> Self {
        Self {
            identity: Identity::rejected(username),
            reason,
        }
    }
}

/// A username/password pair taken from a request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Extract the credential pair from an HTTP Basic `Authorization` header value.
///
/// Returns `None` for other schemes and for values that don't decode to
/// `username:password`.
pub fn parse_basic_auth(header: &str) -> Option<Credentials> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Authenticate a username/password pair against the configured users.
///
/// With no users configured authentication is bypassed and an anonymous
/// identity is returned. This performs a deliberately slow hash
/// verification; async callers should run it on a blocking thread.
pub fn authenticate(
    config: &ServerConfig,
    username: &str,
    password: &str,
) -> Result<Identity, AuthFailure> {
    if !config.authentication_needed() {
        return Ok(Identity::anonymous());
    }

    if username.is_empty() || password.is_empty() {
        return Err(AuthFailure::new(username, PolicyError::CredentialMissing));
    }

    let user = config.user(username).ok_or_else(|| {
        AuthFailure::new(
            username,
            PolicyError::UserNotFound {
                username: username.to_string(),
            },
        )
    })?;

    match verify_password(&user.password_hash, password) {
        Ok(true) => Ok(Identity::authenticated(
            username,
            user.permissions.clone(),
        )),
        Ok(false) => Err(AuthFailure::new(
            username,
            PolicyError::PasswordMismatch {
                username: username.to_string(),
            },
        )),
        Err(e) => Err(AuthFailure::new(username, e)),
    }
}
