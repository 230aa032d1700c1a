//! Author and committer identities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The identity recorded on a commit: a display name and an email
/// address, rendered as `Name <email>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Identity {
    /// Create a new identity.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parse a `Name <email>` string.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let open = s
            .find('<')
            .ok_or_else(|| TypeError::InvalidIdentity(s.to_string()))?;
        let close = s
            .rfind('>')
            .ok_or_else(|| TypeError::InvalidIdentity(s.to_string()))?;
        if close < open {
            return Err(TypeError::InvalidIdentity(s.to_string()));
        }
        let name = s[..open].trim();
        let email = s[open + 1..close].trim();
        if name.is_empty() || email.is_empty() {
            return Err(TypeError::InvalidIdentity(s.to_string()));
        }
        Ok(Self::new(name, email))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}
