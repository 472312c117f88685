//! Principal identifiers.
//!
//! A principal is whoever the authentication chain resolved a request to. The
//! identifier doubles as the name of the owner's artifact directory and is
//! restricted to a path-safe alphabet.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a principal identifier.
pub const MAX_PRINCIPAL_LEN: usize = 64;

/// Validated principal identifier: `[A-Za-z0-9_-]{1,64}`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Parse and validate a principal identifier.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidPrincipal("empty".to_string()));
        }
        if s.len() > MAX_PRINCIPAL_LEN {
            return Err(crate::Error::InvalidPrincipal(format!(
                "longer than {MAX_PRINCIPAL_LEN} characters"
            )));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(crate::Error::InvalidPrincipal(format!(
                "unexpected character {c:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PrincipalId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<PrincipalId> for String {
    fn from(value: PrincipalId) -> Self {
        value.0
    }
}

impl fmt::Debug for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrincipalId({})", self.0)
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_simple_names() {
        for name in ["alice", "bob_2", "ci-runner", "A"] {
            assert!(PrincipalId::parse(name).is_ok(), "{name} should parse");
        }
    }

    #[test]
    fn test_rejects_path_like_names() {
        for name in ["", "..", "a/b", "a\\b", "with space", "dot.name", "ünï"] {
            assert!(PrincipalId::parse(name).is_err(), "{name:?} should fail");
        }
    }

    #[test]
    fn test_rejects_overlong() {
        let long = "a".repeat(MAX_PRINCIPAL_LEN + 1);
        assert!(PrincipalId::parse(&long).is_err());
        let max = "a".repeat(MAX_PRINCIPAL_LEN);
        assert!(PrincipalId::parse(&max).is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let ok: PrincipalId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(ok.as_str(), "alice");
        assert!(serde_json::from_str::<PrincipalId>("\"../etc\"").is_err());
    }
}
