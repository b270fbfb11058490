//! # davgate Policy Library
//!
//! This crate provides the access policy primitives used by the davgate
//! daemon. It holds no shared state and performs no I/O beyond hashing.
//!
//! ## Overview
//!
//! - **Permissions**: compact CRUD strings decoded into four capabilities
//! - **Identity**: the per-request outcome of authentication
//! - **Credentials**: salted Argon2id password hashing and verification
//! - **Jails**: traversal-proof virtual-to-physical path resolution
//! - **Methods**: the capability each protocol method requires
//!
//! ## Example Usage
//!
//! ```rust
//! use std::path::Path;
//! use policy::{Capability, Jail, PermissionSet};
//!
//! let permissions = PermissionSet::parse("cru").unwrap();
//! assert!(permissions.allows(Capability::Create));
//! assert!(!permissions.allows(Capability::Delete));
//!
//! let jail = Jail::new(Path::new("/srv/dav"), Some("/littlejohn"));
//! let physical = jail.resolve("../../etc/passwd").unwrap();
//! assert_eq!(physical, Path::new("/srv/dav/littlejohn/etc/passwd"));
//! ```
//!
//! ## Modules
//!
//! - [`permission`]: CRUD permission strings
//! - [`identity`]: caller identity
//! - [`credentials`]: password hashing
//! - [`path`]: jails and path resolution
//! - [`method`]: protocol method policy table
//! - [`error`]: Error types

pub mod credentials;
pub mod error;
pub mod identity;
pub mod method;
pub mod path;
pub mod permission;

pub use credentials::{
    hash_password, hash_password_with_params, hash_scheme, is_supported_hash, verify_password,
};
pub use error::{PolicyError, Result};
pub use identity::Identity;
pub use method::{Denial, Method, MethodPolicy, ALLOWED_METHODS, DAV_COMPLIANCE};
pub use path::{resolve, Jail};
pub use permission::{Capability, PermissionSet};

// Re-exported so callers can pick hashing cost parameters.
pub use argon2::Params as HashParams;
