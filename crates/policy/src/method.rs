//! Protocol methods and the capability each one requires.

use std::fmt;
use std::str::FromStr;

use crate::permission::Capability;

/// Methods advertised in the `Allow` header of a discovery response.
pub const ALLOWED_METHODS: &[&str] = &[
    "GET", "HEAD", "PUT", "POST", "DELETE", "PROPFIND", "PROPPATCH", "COPY", "MOVE", "LOCK",
    "UNLOCK", "MKCOL",
];

/// Value of the `DAV` compliance header.
pub const DAV_COMPLIANCE: &str = "1, 2, source";

/// An inbound request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
    Options,
    Propfind,
    Proppatch,
    Mkcol,
    Copy,
    Move,
    Lock,
    Unlock,
    /// Any method without an entry in the policy table.
    Other(String),
}

/// Status used when a method's required capability is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Respond 401 Unauthorized.
    Unauthorized,
    /// Respond 403 Forbidden.
    Forbidden,
}

/// What the method gate does with a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodPolicy {
    /// Delegate only if the caller holds the capability.
    Requires {
        capability: Capability,
        denial: Denial,
    },
    /// Delegate without an additional capability check.
    PassThrough,
    /// Answer capability discovery directly.
    Discovery,
    /// Respond 405 Method Not Allowed.
    Disallowed,
    /// Respond 501 Not Implemented.
    Unimplemented,
}

impl Method {
    /// The gate policy for this method.
    pub fn policy(&self) -> MethodPolicy {
        use Capability::*;
        let requires = |capability, denial| MethodPolicy::Requires { capability, denial };
        match self {
            Method::Put | Method::Copy => requires(Create, Denial::Forbidden),
            Method::Mkcol | Method::Lock | Method::Unlock => requires(Create, Denial::Unauthorized),
            Method::Delete => requires(Delete, Denial::Forbidden),
            Method::Move => requires(Update, Denial::Unauthorized),
            Method::Propfind => requires(Read, Denial::Unauthorized),
            Method::Head | Method::Post | Method::Proppatch => MethodPolicy::PassThrough,
            Method::Options => MethodPolicy::Discovery,
            Method::Get => MethodPolicy::Disallowed,
            Method::Other(_) => MethodPolicy::Unimplemented,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Propfind => "PROPFIND",
            Method::Proppatch => "PROPPATCH",
            Method::Mkcol => "MKCOL",
            Method::Copy => "COPY",
            Method::Move => "MOVE",
            Method::Lock => "LOCK",
            Method::Unlock => "UNLOCK",
            Method::Other(name) => name,
        }
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Method names are case-sensitive tokens.
        Ok(match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "PUT" => Method::Put,
            "POST" => Method::Post,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PROPFIND" => Method::Propfind,
            "PROPPATCH" => Method::Proppatch,
            "MKCOL" => Method::Mkcol,
            "COPY" => Method::Copy,
            "MOVE" => Method::Move,
            "LOCK" => Method::Lock,
            "UNLOCK" => Method::Unlock,
            other => Method::Other(other.to_string()),
        })
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(method) => method,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
