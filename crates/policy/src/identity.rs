//! Per-request caller identity.

use serde::Serialize;

use crate::permission::{Capability, PermissionSet};

/// The outcome of authenticating one request.
///
/// Built once per request and never mutated. A rejected login still produces
/// an identity so the attempted username can be logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    username: String,
    authenticated: bool,
    permissions: PermissionSet,
}

impl Identity {
    /// Identity used when no users are configured and authentication is skipped.
    pub fn anonymous() -> Self {
        Self {
            username: String::new(),
            authenticated: false,
            permissions: PermissionSet::none(),
        }
    }

    /// Identity for a failed login attempt.
    pub fn rejected(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            authenticated: false,
            permissions: PermissionSet::none(),
        }
    }

    /// Identity for a verified user.
    pub fn authenticated(username: impl Into<String>, permissions: PermissionSet) -> Self {
        Self {
            username: username.into(),
            authenticated: true,
            permissions,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The permissions attached at authentication time.
    ///
    /// Unauthenticated identities always carry an empty set.
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Shorthand for `self.permissions().allows(capability)`.
    pub fn can(&self, capability: Capability) -> bool {
        self.authenticated && self.permissions.allows(capability)
    }
}
