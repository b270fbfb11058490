//! Compact CRUD permission strings.
//!
//! A user declares the operations they may perform as a short string such as
//! `"crud"` or `"cr"`. Each recognised letter grants one [`Capability`];
//! unrecognised letters are ignored. The string must be 1 to 4 characters long.

use std::fmt;

use serde::Serialize;

use crate::error::{PolicyError, Result};

/// Maximum length of a permission string.
pub const MAX_PERMISSION_LEN: usize = 4;

/// A single capability that a permission set may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Create files and directories, write file contents.
    Create,
    /// List directories, stat and read files.
    Read,
    /// Move and rename.
    Update,
    /// Remove files and directories.
    Delete,
}

impl Capability {
    /// All capabilities in CRUD order.
    pub const ALL: [Capability; 4] = [
        Capability::Create,
        Capability::Read,
        Capability::Update,
        Capability::Delete,
    ];

    /// The permission-string letter for this capability.
    pub fn letter(&self) -> char {
        match self {
            Capability::Create => 'c',
            Capability::Read => 'r',
            Capability::Update => 'u',
            Capability::Delete => 'd',
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Create => "create",
            Capability::Read => "read",
            Capability::Update => "update",
            Capability::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// The four boolean capabilities decoded from a permission string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PermissionSet {
    raw: String,
    create: bool,
    read: bool,
    update: bool,
    delete: bool,
}

impl PermissionSet {
    /// Parse a permission string.
    ///
    /// The string is lowercased, then every `c`, `r`, `u` and `d` sets the
    /// matching flag. Any other character is skipped. Fails if the string is
    /// empty or longer than [`MAX_PERMISSION_LEN`] characters.
    pub fn parse(value: &str) -> Result<Self> {
        let raw = value.to_lowercase();
        let len = raw.chars().count();
        if len == 0 || len > MAX_PERMISSION_LEN {
            return Err(PolicyError::InvalidPermissionString {
                value: value.to_string(),
                len,
            });
        }

        let mut set = Self {
            raw,
            ..Self::default()
        };
        for ch in set.raw.chars() {
            match ch {
                'c' => set.create = true,
                'r' => set.read = true,
                'u' => set.update = true,
                'd' => set.delete = true,
                _ => {}
            }
        }
        Ok(set)
    }

    /// An empty set that grants nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// The set stored in place of a rejected permission string.
    ///
    /// Keeps the offending string for diagnostics; every flag is false.
    pub fn denied(raw: &str) -> Self {
        Self {
            raw: raw.to_lowercase(),
            ..Self::default()
        }
    }

    /// A set that grants every capability.
    pub fn full() -> Self {
        Self {
            raw: "crud".to_string(),
            create: true,
            read: true,
            update: true,
            delete: true,
        }
    }

    /// The normalized (lowercase) permission string.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Check if this set allows the given capability.
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::Create => self.create,
            Capability::Read => self.read,
            Capability::Update => self.update,
            Capability::Delete => self.delete,
        }
    }

    pub fn can_create(&self) -> bool {
        self.create
    }

    pub fn can_read(&self) -> bool {
        self.read
    }

    pub fn can_update(&self) -> bool {
        self.update
    }

    pub fn can_delete(&self) -> bool {
        self.delete
    }

    /// Check if no capability is granted.
    pub fn is_empty(&self) -> bool {
        !(self.create || self.read || self.update || self.delete)
    }

    /// Require a capability, naming the user in the error.
    pub fn require(&self, username: &str, capability: Capability) -> Result<()> {
        if self.allows(capability) {
            Ok(())
        } else {
            Err(PolicyError::Forbidden {
                username: username.to_string(),
                capability,
            })
        }
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_full() {
        let set = PermissionSet::parse("crud").unwrap();
        assert!(set.can_create());
        assert!(set.can_read());
        assert!(set.can_update());
        assert!(set.can_delete());
        assert_eq!(set.raw(), "crud");
    }

    #[test]
    fn test_parse_partial() {
        let set = PermissionSet::parse("cru").unwrap();
        assert!(set.can_create());
        assert!(set.can_read());
        assert!(set.can_update());
        assert!(!set.can_delete());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let set = PermissionSet::parse("RD").unwrap();
        assert_eq!(set.raw(), "rd");
        assert!(set.can_read());
        assert!(set.can_delete());
        assert!(!set.can_create());
        assert!(!set.can_update());
    }

    #[test]
    fn test_parse_ignores_unknown_characters() {
        let set = PermissionSet::parse("rx!").unwrap();
        assert!(set.can_read());
        assert!(!set.can_create());
        assert!(!set.can_update());
        assert!(!set.can_delete());

        let junk = PermissionSet::parse("zzzz").unwrap();
        assert!(junk.is_empty());
    }

    #[test]
    fn test_parse_empty_fails() {
        let err = PermissionSet::parse("").unwrap_err();
        assert_eq!(
            err,
            PolicyError::InvalidPermissionString {
                value: String::new(),
                len: 0
            }
        );
    }

    #[test]
    fn test_parse_too_long_fails() {
        assert!(matches!(
            PermissionSet::parse("crudc"),
            Err(PolicyError::InvalidPermissionString { len: 5, .. })
        ));
    }

    #[test]
    fn test_denied_grants_nothing() {
        let set = PermissionSet::denied("CRUDCRUD");
        assert!(set.is_empty());
        assert_eq!(set.raw(), "crudcrud");
        for capability in Capability::ALL {
            assert!(!set.allows(capability));
        }
    }

    #[test]
    fn test_full_and_none() {
        let full = PermissionSet::full();
        let none = PermissionSet::none();
        for capability in Capability::ALL {
            assert!(full.allows(capability));
            assert!(!none.allows(capability));
        }
    }

    #[test]
    fn test_require() {
        let set = PermissionSet::parse("r").unwrap();
        assert!(set.require("lj", Capability::Read).is_ok());
        assert_eq!(
            set.require("lj", Capability::Delete),
            Err(PolicyError::Forbidden {
                username: "lj".to_string(),
                capability: Capability::Delete,
            })
        );
    }

    #[test]
    fn test_capability_letters() {
        let letters: String = Capability::ALL.iter().map(|c| c.letter()).collect();
        assert_eq!(letters, "crud");
    }

    #[test]
    fn test_serialization() {
        let set = PermissionSet::parse("cr").unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(
            json,
            r#"{"raw":"cr","create":true,"read":true,"update":false,"delete":false}"#
        );
    }

    proptest! {
        #[test]
        fn prop_valid_strings_set_exactly_present_flags(s in "[crudCRUD]{1,4}") {
            let set = PermissionSet::parse(&s).unwrap();
            let lower = s.to_lowercase();
            for capability in Capability::ALL {
                prop_assert_eq!(set.allows(capability), lower.contains(capability.letter()));
            }
            prop_assert_eq!(PermissionSet::parse(&s).unwrap(), set);
        }

        #[test]
        fn prop_out_of_range_length_fails(s in "[a-z]{5,12}") {
            prop_assert!(PermissionSet::parse(&s).is_err());
            prop_assert!(PermissionSet::denied(&s).is_empty());
        }
    }
}
