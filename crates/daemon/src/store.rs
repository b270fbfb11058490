//! Live configuration store with atomic hot reload.
//!
//! The store holds the current [`ServerConfig`] behind an `Arc`. Requests take
//! a snapshot with [`ConfigStore::snapshot`] and keep using it until they
//! finish. A reload merges the updated file into a private copy of the
//! current configuration and then swaps the pointer, so a reader sees either
//! the old or the new configuration and never a partial merge.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Result;
use policy::PermissionSet;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{
    validate_subdir, ConfigError, ConfigFile, ServerConfig, UserEntry, UserRecord,
};

/// Reasons a reload was discarded.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("config store has no source file to reload from")]
    NoSource,

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

/// What a reload changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Users that were added.
    pub added: Vec<String>,
    /// Users that were removed.
    pub removed: Vec<String>,
    /// Existing users with at least one changed field.
    pub updated: Vec<String>,
    /// Users whose declaration was (partly) rejected.
    pub rejected: Vec<String>,
    /// Logging toggles that changed.
    pub log_toggles: Vec<&'static str>,
    /// Changed settings that only take effect after a restart.
    pub restart_required: Vec<&'static str>,
}

impl ReloadSummary {
    /// Returns true if the reload changed nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.updated.is_empty()
            && self.rejected.is_empty()
            && self.log_toggles.is_empty()
            && self.restart_required.is_empty()
    }
}

/// Process-wide holder of the live configuration.
#[derive(Debug)]
pub struct ConfigStore {
    /// File the configuration was loaded from.
    source: Option<PathBuf>,
    current: RwLock<Arc<ServerConfig>>,
    /// Serializes reloads so two merges never race on the same base.
    reload_lock: Mutex<()>,
}

impl ConfigStore {
    /// Create a store without a backing file.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            source: None,
            current: RwLock::new(Arc::new(config)),
            reload_lock: Mutex::new(()),
        }
    }

    /// Create a store that reloads from `path`.
    pub fn with_source<P: AsRef<Path>>(config: ServerConfig, path: P) -> Self {
        Self {
            source: Some(path.as_ref().to_path_buf()),
            ..Self::new(config)
        }
    }

    /// Load the configuration file strictly and create a store backed by it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = ServerConfig::load(path)?;
        Ok(Self::with_source(config, path))
    }

    /// The file this store reloads from.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The current configuration.
    pub fn snapshot(&self) -> Arc<ServerConfig> {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a consistent snapshot.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge an updated configuration file into the live configuration.
    ///
    /// Never fails: individual rejected declarations are logged and skipped.
    /// Afterwards the base directory and every jail directory are created if
    /// they don't exist.
    pub fn apply_reload(&self, updated: &ConfigFile) -> ReloadSummary {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.apply_locked(updated)
    }

    /// Re-read the source file and apply it.
    ///
    /// A file that cannot be read or parsed leaves the live configuration
    /// untouched. The file is read under the reload lock, so the last reload
    /// to finish always applies the newest content it could see.
    pub fn reload(&self) -> Result<ReloadSummary, ReloadError> {
        let path = self.source.as_ref().ok_or(ReloadError::NoSource)?;
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let contents = fs::read_to_string(path).map_err(|source| ReloadError::Read {
            path: path.clone(),
            source,
        })?;
        let updated = ConfigFile::from_toml(&contents).map_err(|source| ReloadError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(self.apply_locked(&updated))
    }

    /// Merge and publish. Callers hold `reload_lock`.
    fn apply_locked(&self, updated: &ConfigFile) -> ReloadSummary {
        let current = self.snapshot();
        let mut summary = ReloadSummary::default();
        let merged = merge(&current, updated, &mut summary);

        if let Err(e) = merged.ensure_directories() {
            warn!(error = %e, "Failed to create directories after reload");
        }

        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(merged);

        info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            updated = summary.updated.len(),
            rejected = summary.rejected.len(),
            "Configuration reloaded"
        );
        summary
    }
}

/// Compute the merged configuration on a copy of `current`.
fn merge(current: &ServerConfig, updated: &ConfigFile, summary: &mut ReloadSummary) -> ServerConfig {
    let mut next = current.clone();

    next.users.retain(|username, _| {
        let keep = updated.users.contains_key(username);
        if !keep {
            info!(user = %username, "Removed user from configuration");
            summary.removed.push(username.clone());
        }
        keep
    });

    for (username, entry) in &updated.users {
        let Some(existing) = next.users.get_mut(username) else {
            if let Some(record) = new_user(username, entry, summary) {
                info!(user = %username, "Added user to configuration");
                summary.added.push(username.clone());
                next.users.insert(username.clone(), record);
            }
            continue;
        };

        let mut changed = false;

        if existing.password_hash != entry.password {
            info!(user = %username, "Updated password of user");
            existing.password_hash = entry.password.clone();
            changed = true;
        }

        if existing.jail_subdir != entry.subdir {
            match validate_subdir(username, entry.subdir.as_deref()) {
                Ok(()) => {
                    info!(user = %username, "Updated subdir of user");
                    existing.jail_subdir = entry.subdir.clone();
                    changed = true;
                }
                Err(e) => {
                    error!(user = %username, error = %e, "Rejected subdir from config file, keeping previous");
                    summary.rejected.push(username.clone());
                }
            }
        }

        if existing.permission_string != entry.permissions {
            match PermissionSet::parse(&entry.permissions) {
                Ok(permissions) => {
                    info!(user = %username, crud = %permissions, "Updated crud of user");
                    existing.permission_string = entry.permissions.clone();
                    existing.permissions = permissions;
                    changed = true;
                }
                Err(e) => {
                    error!(user = %username, error = %e, "Error parsing crud string from config file, keeping previous");
                    summary.rejected.push(username.clone());
                }
            }
        }

        if changed {
            summary.updated.push(username.clone());
        }
    }

    merge_log_toggles(&mut next, updated, summary);
    report_restart_required(&next, updated, summary);
    next
}

/// Build a user added by a reload.
///
/// A malformed permission string yields a user with no capabilities. A
/// malformed subdirectory rejects the user entirely, since ignoring it would
/// widen the user's jail to the whole base directory.
fn new_user(
    username: &str,
    entry: &UserEntry,
    summary: &mut ReloadSummary,
) -> Option<UserRecord> {
    if let Err(e) = validate_subdir(username, entry.subdir.as_deref()) {
        error!(user = %username, error = %e, "Rejected new user from config file");
        summary.rejected.push(username.to_string());
        return None;
    }

    let permissions = match PermissionSet::parse(&entry.permissions) {
        Ok(permissions) => permissions,
        Err(e) => {
            error!(user = %username, error = %e, "Error parsing crud string from config file");
            summary.rejected.push(username.to_string());
            PermissionSet::denied(&entry.permissions)
        }
    };

    Some(UserRecord {
        username: username.to_string(),
        password_hash: entry.password.clone(),
        jail_subdir: entry.subdir.clone(),
        permission_string: entry.permissions.clone(),
        permissions,
    })
}

fn merge_log_toggles(next: &mut ServerConfig, updated: &ConfigFile, summary: &mut ReloadSummary) {
    let toggles: [(&'static str, &mut bool, bool); 5] = [
        ("error", &mut next.log.error, updated.log.error),
        ("create", &mut next.log.create, updated.log.create),
        ("read", &mut next.log.read, updated.log.read),
        ("update", &mut next.log.update, updated.log.update),
        ("delete", &mut next.log.delete, updated.log.delete),
    ];
    for (name, current, wanted) in toggles {
        if *current != wanted {
            *current = wanted;
            info!(operation = name, enabled = wanted, "Set logging for operations");
            summary.log_toggles.push(name);
        }
    }
}

fn report_restart_required(next: &ServerConfig, updated: &ConfigFile, summary: &mut ReloadSummary) {
    let changes = [
        ("address", next.address != updated.address),
        ("port", next.port != updated.port),
        ("prefix", next.prefix != updated.prefix),
        ("dir", next.dir != updated.dir),
        ("tls", next.tls != updated.tls),
        ("realm", next.realm != updated.realm),
        ("cors", next.cors != updated.cors),
        ("log.production", next.log.production != updated.log.production),
        ("log.debug", next.log.debug != updated.log.debug),
    ];
    for (setting, changed) in changes {
        if changed {
            warn!(setting, "Setting changed in config file, restart required to apply");
            summary.restart_required.push(setting);
        }
    }
}
