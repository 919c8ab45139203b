//! Path-like unit identifiers.
//!
//! A [`UnitId`] can only be obtained through [`UnitId::parse`], so every ID
//! that reaches a storage backend is already normalized: no leading or
//! trailing slashes, no empty segments, no `..`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Normalized, validated identifier of a stored unit (e.g. `prod/network/vpc`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId(String);

impl UnitId {
    /// Normalizes and validates a raw ID.
    ///
    /// Slashes are trimmed from both ends and empty segments are dropped, so
    /// `"//a///b/"` becomes `"a/b"`. Any occurrence of `..` is rejected, as is
    /// an ID that is empty after normalization.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.contains("..") {
            return Err(CoreError::InvalidUnitId {
                id: raw.to_string(),
                reason: "must not contain '..'".to_string(),
            });
        }

        let normalized = raw
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        if normalized.is_empty() {
            return Err(CoreError::InvalidUnitId {
                id: raw.to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        Ok(UnitId(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw string-prefix test over the normalized form. An empty prefix
    /// matches every unit.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UnitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for UnitId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitId::parse(s)
    }
}

impl TryFrom<String> for UnitId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        UnitId::parse(&value)
    }
}

impl From<UnitId> for String {
    fn from(id: UnitId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn trims_and_collapses_slashes() {
        assert_eq!(UnitId::parse("/a/b/").unwrap().as_str(), "a/b");
        assert_eq!(UnitId::parse("a//b///c").unwrap().as_str(), "a/b/c");
        assert_eq!(UnitId::parse("single").unwrap().as_str(), "single");
    }

    #[test]
    fn rejects_traversal() {
        let err = UnitId::parse("a/../b").unwrap_err();
        assert!(matches!(err, CoreError::InvalidUnitId { .. }));
        assert!(UnitId::parse("..").is_err());
    }

    #[test]
    fn rejects_empty_after_normalization() {
        assert!(UnitId::parse("").is_err());
        assert!(UnitId::parse("///").is_err());
    }

    #[test]
    fn serde_revalidates() {
        let id: UnitId = serde_json::from_str("\"/x/y/\"").unwrap();
        assert_eq!(id.as_str(), "x/y");
        assert!(serde_json::from_str::<UnitId>("\"../etc\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"x/y\"");
    }

    #[test]
    fn prefix_is_raw_string_prefix() {
        let id = UnitId::parse("team-a/prod/vpc").unwrap();
        assert!(id.has_prefix(""));
        assert!(id.has_prefix("team-a"));
        assert!(id.has_prefix("team-a/pr"));
        assert!(!id.has_prefix("team-b"));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(segments in prop::collection::vec("[a-z0-9_-]{0,6}", 1..6)) {
            let raw = segments.join("/");
            if let Ok(id) = UnitId::parse(&raw) {
                let again = UnitId::parse(id.as_str()).unwrap();
                prop_assert_eq!(again, id.clone());
                prop_assert!(!id.as_str().starts_with('/'));
                prop_assert!(!id.as_str().ends_with('/'));
                prop_assert!(!id.as_str().contains("//"));
            }
        }
    }
}
