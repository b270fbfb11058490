//! Virtual-to-physical path resolution.
//!
//! Callers address files with slash-separated virtual paths. A virtual path is
//! cleaned as if it were rooted at `/`, so `..` can never climb above the
//! virtual root, and is then joined onto the caller's jail root
//! (`base_dir`, or `base_dir/subdir` for users with a configured subdirectory).
//!
//! Resolution is purely lexical. It does not touch the filesystem.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use crate::error::{PolicyError, Result};

/// Resolve `raw` inside the jail formed by `base_dir` and `jail_subdir`.
///
/// Returns `None` when `raw` contains a NUL byte or a platform separator
/// other than `/`.
pub fn resolve(base_dir: &Path, jail_subdir: Option<&str>, raw: &str) -> Option<PathBuf> {
    Jail::new(base_dir, jail_subdir).resolve(raw)
}

/// Split a virtual path into its cleaned segments.
///
/// `.` and empty segments are dropped, `..` removes the previous segment and
/// is discarded at the root.
pub fn clean_segments(raw: &str) -> Result<Vec<&str>> {
    if raw.contains('\0') || (MAIN_SEPARATOR != '/' && raw.contains(MAIN_SEPARATOR)) {
        return Err(PolicyError::IllegalPath(raw.to_string()));
    }

    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }
    Ok(segments)
}

/// Split a configured jail subdirectory into its cleaned segments.
///
/// Same rules as [`clean_segments`], except that a `..` climbing above the
/// root is an error instead of being discarded.
pub fn clean_subdir(raw: &str) -> Result<Vec<&str>> {
    if raw.contains('\0') || (MAIN_SEPARATOR != '/' && raw.contains(MAIN_SEPARATOR)) {
        return Err(PolicyError::IllegalPath(raw.to_string()));
    }

    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PolicyError::IllegalPath(raw.to_string()));
                }
            }
            name => segments.push(name),
        }
    }
    Ok(segments)
}

/// The physical directory a caller is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jail {
    root: PathBuf,
}

impl Jail {
    /// Build the jail for a base directory and an optional user subdirectory.
    ///
    /// The subdirectory is cleaned like any virtual path, so even an
    /// unvalidated `"../etc"` lands inside `base_dir`. Configuration loading
    /// rejects such subdirectories up front with [`clean_subdir`]. A
    /// subdirectory containing illegal characters is ignored and the jail is
    /// `base_dir` itself.
    pub fn new(base_dir: &Path, jail_subdir: Option<&str>) -> Self {
        let mut root = normalize_base(base_dir);
        if let Some(subdir) = jail_subdir {
            if let Ok(segments) = clean_segments(subdir) {
                root.extend(segments);
            }
        }
        Self { root }
    }

    /// The physical root of this jail.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a virtual path to a physical path inside this jail.
    pub fn resolve(&self, raw: &str) -> Option<PathBuf> {
        self.try_resolve(raw).ok()
    }

    /// Like [`Jail::resolve`] but reports why the path was rejected.
    pub fn try_resolve(&self, raw: &str) -> Result<PathBuf> {
        let segments = clean_segments(raw)?;
        let mut path = self.root.clone();
        path.extend(segments);
        Ok(path)
    }

    /// Check if a resolved physical path is the jail root itself.
    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    /// Check if a physical path lies inside this jail (root included).
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }
}

/// Lexically normalize the base directory. An empty base means `.`.
fn normalize_base(base_dir: &Path) -> PathBuf {
    let normalized: PathBuf = base_dir
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}
