//! Configuration management for the davgate daemon.
//!
//! The configuration is a TOML file. [`ConfigFile`] mirrors the file as
//! written; [`ServerConfig`] is the validated form with every user's
//! permission string decoded. Startup goes through [`ServerConfig::load`],
//! which is strict: any malformed user declaration is fatal. Hot reloads go
//! through [`crate::store::ConfigStore`], which merges a [`ConfigFile`] leniently.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use policy::{Identity, Jail, PermissionSet, PolicyError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration file name looked up in the search directories.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid TOML configuration: {0}")]
    Parse(String),

    #[error("invalid permissions for user {user}: {source}")]
    InvalidPermissions {
        user: String,
        #[source]
        source: PolicyError,
    },

    #[error("invalid subdir for user {user}: {subdir:?}")]
    InvalidSubdir { user: String, subdir: String },

    #[error("TLS {kind} doesn't exist: {}", .path.display())]
    MissingTlsFile { kind: &'static str, path: PathBuf },

    #[error("no configuration file found, searched: {}", format_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The configuration file as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfigFile {
    /// Address the listener binds to.
    pub address: String,

    /// Port the listener binds to.
    pub port: u16,

    /// URL prefix stripped from request paths.
    pub prefix: String,

    /// Base directory served to callers.
    pub dir: PathBuf,

    /// Realm announced in authentication challenges.
    pub realm: String,

    /// TLS certificate and key. Plain HTTP when absent.
    pub tls: Option<TlsConfig>,

    /// Cross-origin resource sharing settings.
    pub cors: CorsConfig,

    /// Logging toggles.
    pub log: LogConfig,

    /// Declared users keyed by username. No users disables authentication.
    pub users: BTreeMap<String, UserEntry>,
}

/// A user as declared in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEntry {
    /// Argon2 PHC hash of the user's password.
    pub password: String,

    /// Optional jail subdirectory relative to the base directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,

    /// CRUD permission string. Mandatory for every declared user.
    pub permissions: String,
}

/// TLS certificate and key file locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Cross-origin resource sharing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origin. Empty disables CORS headers.
    pub origin: String,

    /// Whether to send `Access-Control-Allow-Credentials: true`.
    pub credentials: bool,
}

/// Logging toggles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Log failed logins and protocol engine errors.
    pub error: bool,
    /// Log create operations.
    pub create: bool,
    /// Log read operations.
    pub read: bool,
    /// Log update operations.
    pub update: bool,
    /// Log delete operations.
    pub delete: bool,
    /// Emit JSON log lines.
    pub production: bool,
    /// Enable debug level logging.
    pub debug: bool,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8000,
            prefix: String::new(),
            dir: PathBuf::from("/tmp"),
            tls: None,
            realm: "davgate".to_string(),
            cors: CorsConfig::default(),
            log: LogConfig::default(),
            users: BTreeMap::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            error: true,
            create: false,
            read: false,
            update: false,
            delete: false,
            production: false,
            debug: false,
        }
    }
}

impl ConfigFile {
    /// Parse a configuration file from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(format_toml_error(&e)))
    }

    /// Read and parse a configuration file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// A configured user with decoded permissions.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub jail_subdir: Option<String>,
    /// The permission string as declared.
    pub permission_string: String,
    pub permissions: PermissionSet,
}

impl UserRecord {
    /// Build a record from its file entry, rejecting malformed declarations.
    pub fn from_entry(username: &str, entry: &UserEntry) -> Result<Self, ConfigError> {
        let permissions =
            PermissionSet::parse(&entry.permissions).map_err(|source| {
                ConfigError::InvalidPermissions {
                    user: username.to_string(),
                    source,
                }
            })?;
        validate_subdir(username, entry.subdir.as_deref())?;

        Ok(Self {
            username: username.to_string(),
            password_hash: entry.password.clone(),
            jail_subdir: entry.subdir.clone(),
            permission_string: entry.permissions.clone(),
            permissions,
        })
    }
}

/// Reject subdirectories with illegal characters or that climb above `dir`.
pub(crate) fn validate_subdir(username: &str, subdir: Option<&str>) -> Result<(), ConfigError> {
    match subdir {
        Some(subdir) if policy::path::clean_subdir(subdir).is_err() => {
            Err(ConfigError::InvalidSubdir {
                user: username.to_string(),
                subdir: subdir.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// The validated, live server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub prefix: String,
    pub dir: PathBuf,
    pub tls: Option<TlsConfig>,
    pub realm: String,
    pub cors: CorsConfig,
    pub log: LogConfig,
    pub users: BTreeMap<String, UserRecord>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let file = ConfigFile::default();
        Self {
            address: file.address,
            port: file.port,
            prefix: file.prefix,
            dir: file.dir,
            tls: file.tls,
            realm: file.realm,
            cors: file.cors,
            log: file.log,
            users: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Build the validated configuration from a parsed file.
    pub fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let users = file
            .users
            .iter()
            .map(|(name, entry)| Ok((name.clone(), UserRecord::from_entry(name, entry)?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        Ok(Self {
            address: file.address,
            port: file.port,
            prefix: file.prefix,
            dir: file.dir,
            tls: file.tls,
            realm: file.realm,
            cors: file.cors,
            log: file.log,
            users,
        })
    }

    /// Parse and validate a configuration from a TOML string.
    ///
    /// TLS files are not checked here; see [`ServerConfig::validate`].
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let file = ConfigFile::from_toml(toml_str)?;
        Ok(Self::from_file(file)?)
    }

    /// Load, parse and validate a configuration file.
    ///
    /// Every failure is fatal: unreadable file, malformed TOML, a user
    /// without permissions, an invalid permission string or a missing TLS file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Parsing config file");

        let file = ConfigFile::read(path)?;
        let config = Self::from_file(file)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.validate()?;

        for user in config.users.values() {
            tracing::info!(user = %user.username, crud = %user.permissions, "Parsed permissions from config file");
            if !policy::is_supported_hash(&user.password_hash) {
                tracing::warn!(
                    user = %user.username,
                    scheme = policy::hash_scheme(&user.password_hash).unwrap_or("unknown"),
                    "Password hash is not Argon2, the user cannot log in until it is re-hashed with `davgate hash`"
                );
            }
        }
        Ok(config)
    }

    /// Check settings that depend on the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(tls) = &self.tls {
            if !tls.key_file.exists() {
                return Err(ConfigError::MissingTlsFile {
                    kind: "keyFile",
                    path: tls.key_file.clone(),
                });
            }
            if !tls.cert_file.exists() {
                return Err(ConfigError::MissingTlsFile {
                    kind: "certFile",
                    path: tls.cert_file.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether users are declared and requests must authenticate.
    pub fn authentication_needed(&self) -> bool {
        !self.users.is_empty()
    }

    pub fn user(&self, username: &str) -> Option<&UserRecord> {
        self.users.get(username)
    }

    /// The jail an identity is confined to.
    ///
    /// Only authenticated users with a configured subdirectory get one;
    /// everybody else sees the base directory.
    pub fn jail_for(&self, identity: &Identity) -> Jail {
        let subdir = if identity.is_authenticated() {
            self.user(identity.username())
                .and_then(|user| user.jail_subdir.as_deref())
        } else {
            None
        };
        Jail::new(&self.dir, subdir)
    }

    /// Create the base directory and every user's jail directory if absent.
    ///
    /// Fails only if the base directory cannot be created; a user directory
    /// that cannot be created is logged and skipped.
    pub fn ensure_directories(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).with_context(|| {
                format!("Failed to create base directory: {}", self.dir.display())
            })?;
            tracing::info!(path = %self.dir.display(), "Created base dir");
        }

        for user in self.users.values() {
            let Some(subdir) = user.jail_subdir.as_deref() else {
                continue;
            };
            let path = Jail::new(&self.dir, Some(subdir)).root().to_path_buf();
            if path.exists() {
                continue;
            }
            match fs::create_dir_all(&path) {
                Ok(()) => tracing::info!(path = %path.display(), user = %user.username, "Created user dir"),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    user = %user.username,
                    error = %e,
                    "Can't create user dir"
                ),
            }
        }
        Ok(())
    }
}

/// Directories searched for [`CONFIG_FILE_NAME`] when no path is given.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("config").join(CONFIG_FILE_NAME)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".swd").join(CONFIG_FILE_NAME));
        paths.push(home.join(".davgate").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from(CONFIG_FILE_NAME));
    paths
}

/// Pick the configuration file: the explicit path if given, else the first
/// existing entry of [`search_paths`].
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let searched = search_paths();
    searched
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or(ConfigError::NotFound { searched })
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
