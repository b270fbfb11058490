//! Per-request authorization context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use policy::{Capability, Identity, Jail, PermissionSet, PolicyError};
use tracing::warn;

use crate::config::ServerConfig;

/// Everything the gates need to decide about one request.
///
/// Pins the configuration snapshot taken when the request arrived, so every
/// decision made for the request is consistent even if a reload lands while
/// it is in flight.
#[derive(Debug, Clone)]
pub struct RequestContext {
    identity: Identity,
    config: Arc<ServerConfig>,
    jail: Jail,
    permissions: PermissionSet,
    /// Client address, for failure logs.
    address: String,
}

impl RequestContext {
    pub fn new(identity: Identity, config: Arc<ServerConfig>) -> Self {
        let jail = config.jail_for(&identity);
        let permissions = if !config.authentication_needed() {
            // No users configured: nothing to enforce beyond the jail.
            PermissionSet::full()
        } else if identity.is_authenticated() {
            identity.permissions().clone()
        } else {
            PermissionSet::none()
        };

        Self {
            identity,
            config,
            jail,
            permissions,
            address: String::new(),
        }
    }

    /// Attach the client address used in failure logs.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn username(&self) -> &str {
        self.identity.username()
    }

    /// Client address, empty when unknown.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn jail(&self) -> &Jail {
        &self.jail
    }

    /// Whether the request runs without authentication.
    pub fn is_bypass(&self) -> bool {
        !self.config.authentication_needed()
    }

    /// The permissions in force for this request.
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.permissions.allows(capability)
    }

    /// Fail with [`policy::PolicyError::Forbidden`] if `capability` is missing.
    pub fn require(&self, capability: Capability) -> policy::Result<()> {
        self.permissions.require(self.username(), capability)
    }

    /// Resolve a virtual path inside the caller's jail.
    pub fn resolve(&self, raw: &str) -> Option<PathBuf> {
        self.jail.resolve(raw)
    }

    /// Log an authorization denial if `log.error` is on.
    pub fn log_denial(&self, action: &str, path: &Path, reason: &PolicyError) {
        if self.config.log.error {
            warn!(
                user = %self.username(),
                address = %self.address,
                action,
                path = %path.display(),
                reason = %reason,
                "Authorization denied"
            );
        }
    }
}

/// Capture what the current thread logs while `f` runs.
#[cfg(test)]
pub(crate) fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let output = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (result, output)
}
