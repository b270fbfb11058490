//! Protocol method gate.
//!
//! Runs once per request, after authentication and before the protocol engine
//! sees the request. The capability each method needs comes from
//! [`Method::policy`].

use std::fs;
use std::path::Path;

use policy::{Capability, Denial, Method, MethodPolicy};
use tracing::debug;

use crate::context::RequestContext;

/// Outcome of the method gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Hand the request to the protocol engine.
    Delegate,
    /// Reject with 401 or 403.
    Deny(Denial),
    /// Answer with the supported methods and compliance classes.
    Discovery,
    /// Respond 405 Method Not Allowed.
    MethodNotAllowed,
    /// Respond 501 Not Implemented.
    NotImplemented,
}

/// Decide what to do with `method` on the virtual path `path`.
pub fn authorize(ctx: &RequestContext, method: &Method, path: &str) -> GateDecision {
    debug!(method = %method, user = %ctx.username(), crud = %ctx.permissions(), "Method received");

    match method.policy() {
        MethodPolicy::Discovery => GateDecision::Discovery,
        MethodPolicy::Disallowed => GateDecision::MethodNotAllowed,
        MethodPolicy::Unimplemented => GateDecision::NotImplemented,
        MethodPolicy::PassThrough => GateDecision::Delegate,
        MethodPolicy::Requires { capability, denial } => {
            if let Err(reason) = ctx.require(capability) {
                ctx.log_denial(method.as_str(), Path::new(path), &reason);
                return GateDecision::Deny(denial);
            }
            if matches!(method, Method::Propfind) && !ctx.can(Capability::Create) && !exists(ctx, path) {
                // Don't let callers without create probe for names.
                if let Err(reason) = ctx.require(Capability::Create) {
                    ctx.log_denial(method.as_str(), Path::new(path), &reason);
                }
                return GateDecision::Deny(Denial::Unauthorized);
            }
            GateDecision::Delegate
        }
    }
}

/// Existence as [`crate::fs::JailedFs::stat`] sees it: symlinks are followed.
fn exists(ctx: &RequestContext, path: &str) -> bool {
    ctx.resolve(path)
        .is_some_and(|physical| fs::metadata(physical).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, ServerConfig, UserEntry};
    use policy::Identity;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(dir: &std::path::Path, crud: &str) -> RequestContext {
        let mut file = ConfigFile {
            dir: dir.to_path_buf(),
            ..ConfigFile::default()
        };
        file.users.insert(
            "lj".to_string(),
            UserEntry {
                password: "hash".to_string(),
                subdir: None,
                permissions: crud.to_string(),
            },
        );
        let config = Arc::new(ServerConfig::from_file(file).unwrap());
        let permissions = config.user("lj").unwrap().permissions.clone();
        RequestContext::new(Identity::authenticated("lj", permissions), config)
    }

    #[test]
    fn test_fixed_responses() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(temp_dir.path(), "crud");

        assert_eq!(authorize(&ctx, &Method::Options, "/"), GateDecision::Discovery);
        assert_eq!(authorize(&ctx, &Method::Get, "/x"), GateDecision::MethodNotAllowed);
        assert_eq!(
            authorize(&ctx, &Method::from("PATCH"), "/x"),
            GateDecision::NotImplemented
        );
    }

    #[test]
    fn test_full_permissions_delegate() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(temp_dir.path(), "crud");

        for method in [
            Method::Put,
            Method::Delete,
            Method::Mkcol,
            Method::Copy,
            Method::Move,
            Method::Lock,
            Method::Unlock,
            Method::Propfind,
            Method::Head,
            Method::Post,
            Method::Proppatch,
        ] {
            assert_eq!(authorize(&ctx, &method, "/x"), GateDecision::Delegate, "{method}");
        }
    }

    #[test]
    fn test_read_only_denials() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(temp_dir.path(), "r");

        assert_eq!(
            authorize(&ctx, &Method::Put, "/x"),
            GateDecision::Deny(Denial::Forbidden)
        );
        assert_eq!(
            authorize(&ctx, &Method::Delete, "/x"),
            GateDecision::Deny(Denial::Forbidden)
        );
        assert_eq!(
            authorize(&ctx, &Method::Mkcol, "/x"),
            GateDecision::Deny(Denial::Unauthorized)
        );
        assert_eq!(
            authorize(&ctx, &Method::Move, "/x"),
            GateDecision::Deny(Denial::Unauthorized)
        );
        assert_eq!(
            authorize(&ctx, &Method::Lock, "/x"),
            GateDecision::Deny(Denial::Unauthorized)
        );
        assert_eq!(authorize(&ctx, &Method::Head, "/x"), GateDecision::Delegate);
    }

    #[test]
    fn test_propfind_missing_resource_without_create() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("exists.txt"), "robin").unwrap();
        let ctx = context(temp_dir.path(), "r");

        assert_eq!(
            authorize(&ctx, &Method::Propfind, "/exists.txt"),
            GateDecision::Delegate
        );
        assert_eq!(
            authorize(&ctx, &Method::Propfind, "/missing.txt"),
            GateDecision::Deny(Denial::Unauthorized)
        );
        assert_eq!(
            authorize(&ctx, &Method::Propfind, "/bad\0name"),
            GateDecision::Deny(Denial::Unauthorized)
        );

        let ctx = context(temp_dir.path(), "cr");
        assert_eq!(
            authorize(&ctx, &Method::Propfind, "/missing.txt"),
            GateDecision::Delegate
        );
    }

    #[test]
    fn test_denials_logged_with_address() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(temp_dir.path(), "r").with_address("203.0.113.7");

        let (decision, logs) = crate::context::capture_logs(|| authorize(&ctx, &Method::Delete, "/x"));
        assert_eq!(decision, GateDecision::Deny(Denial::Forbidden));
        assert!(logs.contains("WARN"));
        assert!(logs.contains("user=lj"));
        assert!(logs.contains("address=203.0.113.7"));
        assert!(logs.contains("path=/x"));

        let (decision, logs) =
            crate::context::capture_logs(|| authorize(&ctx, &Method::Propfind, "/missing"));
        assert_eq!(decision, GateDecision::Deny(Denial::Unauthorized));
        assert!(logs.contains("address=203.0.113.7"));
    }

    #[test]
    #[cfg(unix)]
    fn test_propfind_dangling_symlink_is_missing() {
        let temp_dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(
            temp_dir.path().join("nowhere"),
            temp_dir.path().join("dangling"),
        )
        .unwrap();
        let ctx = context(temp_dir.path(), "r");

        assert_eq!(
            authorize(&ctx, &Method::Propfind, "/dangling"),
            GateDecision::Deny(Denial::Unauthorized)
        );
        assert!(crate::fs::JailedFs::new()
            .stat(&ctx, "/dangling")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_bypass_mode_only_fixed_rows() {
        let temp_dir = TempDir::new().unwrap();
        let config = Arc::new(ServerConfig {
            dir: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        });
        let ctx = RequestContext::new(Identity::anonymous(), config);

        assert_eq!(authorize(&ctx, &Method::Delete, "/x"), GateDecision::Delegate);
        assert_eq!(authorize(&ctx, &Method::Propfind, "/missing"), GateDecision::Delegate);
        assert_eq!(authorize(&ctx, &Method::Get, "/x"), GateDecision::MethodNotAllowed);
    }
}
