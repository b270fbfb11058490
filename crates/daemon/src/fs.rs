//! Jailed virtual filesystem handed to the protocol engine.
//!
//! Every operation resolves the virtual path inside the caller's jail and
//! re-checks the capability it needs before touching the disk. A path that
//! cannot be resolved looks exactly like a missing file.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use policy::{Capability, PolicyError};
use thiserror::Error;
use tracing::{info, warn};

use crate::context::RequestContext;

/// Errors returned by [`JailedFs`].
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error(transparent)]
    Forbidden(PolicyError),

    #[error("operation on the jail root is prohibited: {}", .0.display())]
    RootProtected(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FsError {
    /// Whether the error means the file is missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound(_) => true,
            FsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Io(e) => e,
            FsError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            FsError::Forbidden(_) => io::Error::new(io::ErrorKind::PermissionDenied, err),
            FsError::RootProtected(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
        }
    }
}

/// Access mode requested from [`JailedFs::open_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    /// Open an existing file for reading.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Create or truncate a file for writing.
    pub fn create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// Whether the mode can modify or create the file.
    pub fn is_write(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }

    fn to_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(self.read)
            .write(self.write)
            .append(self.append)
            .create(self.create)
            .truncate(self.truncate);
        options
    }
}

/// The filesystem capability surface the protocol engine calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct JailedFs;

impl JailedFs {
    pub fn new() -> Self {
        Self
    }

    /// Create a directory. Requires create.
    pub fn mkdir(&self, ctx: &RequestContext, name: &str) -> Result<(), FsError> {
        let path = resolve(ctx, name)?;
        require(ctx, Capability::Create, "mkdir", &path)?;

        fs::create_dir(&path)?;
        if ctx.config().log.create {
            info!(user = %ctx.username(), path = %path.display(), "Created directory");
        }
        Ok(())
    }

    /// Open a file.
    ///
    /// Reading requires read. Any write mode requires create; without it the
    /// call succeeds with `Ok(None)` and nothing is opened.
    pub fn open_file(
        &self,
        ctx: &RequestContext,
        name: &str,
        flags: OpenFlags,
    ) -> Result<Option<File>, FsError> {
        let path = resolve(ctx, name)?;
        if flags.read {
            require(ctx, Capability::Read, "open", &path)?;
        }
        if flags.is_write() && !ctx.can(Capability::Create) {
            if ctx.config().log.create {
                warn!(user = %ctx.username(), path = %path.display(), "Unauthorized to create file");
            }
            return Ok(None);
        }

        let file = flags.to_options().open(&path)?;
        let log = &ctx.config().log;
        if flags.is_write() && log.create {
            info!(user = %ctx.username(), path = %path.display(), "Opened file for writing");
        } else if log.read {
            info!(user = %ctx.username(), path = %path.display(), "Opened file");
        }
        Ok(Some(file))
    }

    /// Remove a file or a directory tree. Requires delete.
    ///
    /// The jail root can never be removed. Removing a missing path succeeds.
    pub fn remove_all(&self, ctx: &RequestContext, name: &str) -> Result<(), FsError> {
        let path = resolve(ctx, name)?;
        if ctx.jail().is_root(&path) {
            return Err(root_protected(ctx, "remove", path));
        }
        require(ctx, Capability::Delete, "remove", &path)?;

        match remove_path(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if ctx.config().log.delete {
            info!(user = %ctx.username(), path = %path.display(), "Deleted file or directory");
        }
        Ok(())
    }

    /// Rename a file or directory. Requires update.
    ///
    /// The jail root can be neither the source nor the destination.
    pub fn rename(&self, ctx: &RequestContext, from: &str, to: &str) -> Result<(), FsError> {
        let old_path = resolve(ctx, from)?;
        let new_path = resolve(ctx, to)?;
        for path in [&old_path, &new_path] {
            if ctx.jail().is_root(path) {
                return Err(root_protected(ctx, "rename", path.clone()));
            }
        }
        require(ctx, Capability::Update, "rename", &old_path)?;

        fs::rename(&old_path, &new_path)?;
        if ctx.config().log.update {
            info!(
                user = %ctx.username(),
                old_path = %old_path.display(),
                new_path = %new_path.display(),
                "Renamed file or directory"
            );
        }
        Ok(())
    }

    /// Look up file metadata. Requires read.
    ///
    /// A missing file is `Ok(None)` for callers without create, so they learn
    /// nothing they could not create anyway.
    pub fn stat(&self, ctx: &RequestContext, name: &str) -> Result<Option<Metadata>, FsError> {
        let path = resolve(ctx, name)?;
        require(ctx, Capability::Read, "stat", &path)?;

        match fs::metadata(&path) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !ctx.can(Capability::Create) => {
                if ctx.config().log.create {
                    warn!(user = %ctx.username(), path = %path.display(), "Lookup of missing file without create permission");
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Check a capability, logging the denial.
fn require(
    ctx: &RequestContext,
    capability: Capability,
    action: &str,
    path: &Path,
) -> Result<(), FsError> {
    ctx.require(capability).map_err(|reason| {
        ctx.log_denial(action, path, &reason);
        FsError::Forbidden(reason)
    })
}

fn root_protected(ctx: &RequestContext, action: &str, path: PathBuf) -> FsError {
    if ctx.config().log.error {
        warn!(
            user = %ctx.username(),
            address = %ctx.address(),
            action,
            path = %path.display(),
            "Refused operation on the jail root"
        );
    }
    FsError::RootProtected(path)
}

fn resolve(ctx: &RequestContext, name: &str) -> Result<PathBuf, FsError> {
    ctx.resolve(name)
        .ok_or_else(|| FsError::NotFound(name.to_string()))
}

fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, ServerConfig, UserEntry};
    use crate::context::capture_logs;
    use policy::Identity;
    use std::io::{Read, Write};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(dir: &Path, crud: &str) -> RequestContext {
        let mut file = ConfigFile {
            dir: dir.to_path_buf(),
            ..ConfigFile::default()
        };
        file.log.create = true;
        file.log.delete = true;
        file.users.insert(
            "lj".to_string(),
            UserEntry {
                password: "hash".to_string(),
                subdir: Some("/littlejohn".to_string()),
                permissions: crud.to_string(),
            },
        );
        let config = ServerConfig::from_file(file).unwrap();
        config.ensure_directories().unwrap();
        let permissions = config.user("lj").unwrap().permissions.clone();
        RequestContext::new(Identity::authenticated("lj", permissions), Arc::new(config))
    }

    #[test]
    fn test_mkdir_requires_create() {
        let temp_dir = TempDir::new().unwrap();
        let jailfs = JailedFs::new();

        let ctx = context(temp_dir.path(), "r");
        let err = jailfs.mkdir(&ctx, "/docs").unwrap_err();
        assert!(matches!(err, FsError::Forbidden(PolicyError::Forbidden { .. })));
        assert!(!temp_dir.path().join("littlejohn/docs").exists());

        let ctx = context(temp_dir.path(), "cr");
        jailfs.mkdir(&ctx, "/docs").unwrap();
        assert!(temp_dir.path().join("littlejohn/docs").is_dir());
    }

    #[test]
    fn test_open_write_without_create_is_soft_denied() {
        let temp_dir = TempDir::new().unwrap();
        let jailfs = JailedFs::new();
        let ctx = context(temp_dir.path(), "r");

        let file = jailfs
            .open_file(&ctx, "/x", OpenFlags::create_truncate())
            .unwrap();
        assert!(file.is_none());
        assert!(!temp_dir.path().join("littlejohn/x").exists());
    }

    #[test]
    fn test_open_write_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let jailfs = JailedFs::new();
        let ctx = context(temp_dir.path(), "cr");

        let mut file = jailfs
            .open_file(&ctx, "../../x", OpenFlags::create_truncate())
            .unwrap()
            .unwrap();
        file.write_all(b"sherwood").unwrap();
        drop(file);
        assert!(temp_dir.path().join("littlejohn/x").is_file());

        let mut file = jailfs
            .open_file(&ctx, "/x", OpenFlags::read_only())
            .unwrap()
            .unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "sherwood");
    }

    #[test]
    fn test_open_read_requires_read() {
        let temp_dir = TempDir::new().unwrap();
        let jailfs = JailedFs::new();
        let ctx = context(temp_dir.path(), "c");
        fs::write(temp_dir.path().join("littlejohn/x"), "").unwrap();

        let err = jailfs
            .open_file(&ctx, "/x", OpenFlags::read_only())
            .unwrap_err();
        assert!(matches!(err, FsError::Forbidden(_)));
    }

    #[test]
    fn test_illegal_path_looks_missing() {
        let temp_dir = TempDir::new().unwrap();
        let jailfs = JailedFs::new();
        let ctx = context(temp_dir.path(), "crud");

        let err = jailfs.stat(&ctx, "a\0b").unwrap_err();
        assert!(err.is_not_found());
        assert!(jailfs.mkdir(&ctx, "a\0b").unwrap_err().is_not_found());
        let io_err: io::Error = jailfs.remove_all(&ctx, "a\0b").unwrap_err().into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_remove_all_refuses_jail_root() {
        let temp_dir = TempDir::new().unwrap();
        let jailfs = JailedFs::new();
        let ctx = context(temp_dir.path(), "crud");

        for name in ["", "/", ".", "..", "../.."] {
            let err = jailfs.remove_all(&ctx, name).unwrap_err();
            assert!(matches!(err, FsError::RootProtected(_)), "{name:?}");
        }
        assert!(temp_dir.path().join("littlejohn").is_dir());
    }

    #[test]
    fn test_remove_all_requires_delete() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("littlejohn/tree");
        fs::create_dir_all(target.join("branch")).unwrap();
        fs::write(target.join("branch/leaf"), "").unwrap();
        let jailfs = JailedFs::new();

        let ctx = context(temp_dir.path(), "cru");
        assert!(matches!(
            jailfs.remove_all(&ctx, "/tree").unwrap_err(),
            FsError::Forbidden(_)
        ));
        assert!(target.exists());

        let ctx = context(temp_dir.path(), "d");
        jailfs.remove_all(&ctx, "/tree").unwrap();
        assert!(!target.exists());

        // Already gone
        jailfs.remove_all(&ctx, "/tree").unwrap();
    }

    #[test]
    fn test_rename() {
        let temp_dir = TempDir::new().unwrap();
        let jail = temp_dir.path().join("littlejohn");
        fs::create_dir_all(&jail).unwrap();
        fs::write(jail.join("old"), "").unwrap();
        let jailfs = JailedFs::new();

        let ctx = context(temp_dir.path(), "cr");
        assert!(matches!(
            jailfs.rename(&ctx, "/old", "/new").unwrap_err(),
            FsError::Forbidden(_)
        ));

        let ctx = context(temp_dir.path(), "u");
        jailfs.rename(&ctx, "/old", "/new").unwrap();
        assert!(jail.join("new").exists());
        assert!(!jail.join("old").exists());
    }

    #[test]
    fn test_rename_refuses_jail_root() {
        let temp_dir = TempDir::new().unwrap();
        let jail = temp_dir.path().join("littlejohn");
        fs::create_dir_all(&jail).unwrap();
        fs::write(jail.join("file"), "").unwrap();
        let jailfs = JailedFs::new();
        let ctx = context(temp_dir.path(), "crud");

        assert!(matches!(
            jailfs.rename(&ctx, "/", "/moved").unwrap_err(),
            FsError::RootProtected(_)
        ));
        assert!(matches!(
            jailfs.rename(&ctx, "/file", "..").unwrap_err(),
            FsError::RootProtected(_)
        ));
        assert!(jail.join("file").exists());
    }

    #[test]
    fn test_stat() {
        let temp_dir = TempDir::new().unwrap();
        let jail = temp_dir.path().join("littlejohn");
        fs::create_dir_all(&jail).unwrap();
        fs::write(jail.join("file"), "robin").unwrap();
        let jailfs = JailedFs::new();

        let ctx = context(temp_dir.path(), "r");
        let metadata = jailfs.stat(&ctx, "/file").unwrap().unwrap();
        assert_eq!(metadata.len(), 5);
        assert!(jailfs.stat(&ctx, "/missing").unwrap().is_none());

        let ctx = context(temp_dir.path(), "cr");
        let err = jailfs.stat(&ctx, "/missing").unwrap_err();
        assert!(err.is_not_found());

        let ctx = context(temp_dir.path(), "c");
        assert!(matches!(
            jailfs.stat(&ctx, "/file").unwrap_err(),
            FsError::Forbidden(_)
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_stat_surfaces_not_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let jail = temp_dir.path().join("littlejohn");
        fs::create_dir_all(&jail).unwrap();
        fs::write(jail.join("file"), "robin").unwrap();
        let jailfs = JailedFs::new();

        let ctx = context(temp_dir.path(), "r");
        let err = jailfs.stat(&ctx, "/file/child").unwrap_err();
        assert!(matches!(&err, FsError::Io(e) if e.kind() == io::ErrorKind::NotADirectory));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_open_append_without_create_is_soft_denied() {
        let temp_dir = TempDir::new().unwrap();
        let jail = temp_dir.path().join("littlejohn");
        fs::create_dir_all(&jail).unwrap();
        fs::write(jail.join("log"), "robin").unwrap();
        let jailfs = JailedFs::new();
        let append = OpenFlags {
            append: true,
            ..OpenFlags::default()
        };

        let ctx = context(temp_dir.path(), "r");
        assert!(jailfs.open_file(&ctx, "/log", append).unwrap().is_none());
        assert_eq!(fs::read_to_string(jail.join("log")).unwrap(), "robin");

        let ctx = context(temp_dir.path(), "cr");
        let mut file = jailfs.open_file(&ctx, "/log", append).unwrap().unwrap();
        file.write_all(b" hood").unwrap();
        drop(file);
        assert_eq!(fs::read_to_string(jail.join("log")).unwrap(), "robin hood");
    }

    #[test]
    fn test_remove_and_rename_denials_are_logged() {
        let temp_dir = TempDir::new().unwrap();
        let jail = temp_dir.path().join("littlejohn");
        fs::create_dir_all(&jail).unwrap();
        fs::write(jail.join("old"), "").unwrap();
        let jailfs = JailedFs::new();
        let ctx = context(temp_dir.path(), "cr").with_address("203.0.113.7");

        let (result, logs) = capture_logs(|| jailfs.remove_all(&ctx, "/old"));
        assert!(matches!(result, Err(FsError::Forbidden(_))));
        assert!(logs.contains("WARN"));
        assert!(logs.contains("user=lj"));
        assert!(logs.contains("address=203.0.113.7"));

        let (result, logs) = capture_logs(|| jailfs.rename(&ctx, "/old", "/new"));
        assert!(matches!(result, Err(FsError::Forbidden(_))));
        assert!(logs.contains("address=203.0.113.7"));
        assert!(jail.join("old").exists());

        let (result, logs) = capture_logs(|| jailfs.remove_all(&ctx, "/"));
        assert!(matches!(result, Err(FsError::RootProtected(_))));
        assert!(logs.contains("Refused operation on the jail root"));
    }

    #[test]
    fn test_denials_not_logged_without_error_logging() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = context(temp_dir.path(), "r").config().clone();
        config.log.error = false;
        let permissions = config.user("lj").unwrap().permissions.clone();
        let ctx = RequestContext::new(Identity::authenticated("lj", permissions), Arc::new(config));

        let (result, logs) = capture_logs(|| JailedFs::new().remove_all(&ctx, "/x"));
        assert!(matches!(result, Err(FsError::Forbidden(_))));
        assert!(!logs.contains("Authorization denied"));
    }

    #[test]
    fn test_bypass_mode_keeps_root_protection() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig {
            dir: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let ctx = RequestContext::new(Identity::anonymous(), Arc::new(config));
        let jailfs = JailedFs::new();

        jailfs.mkdir(&ctx, "/open").unwrap();
        assert!(temp_dir.path().join("open").is_dir());
        assert!(matches!(
            jailfs.remove_all(&ctx, "/").unwrap_err(),
            FsError::RootProtected(_)
        ));
        jailfs.remove_all(&ctx, "/open").unwrap();
    }
}
