//! Validated blob keys

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound on key length; keys become file names and coordination paths.
pub const MAX_KEY_LEN: usize = 255;

/// A blob identifier made only of ASCII alphanumerics, `.`, `-` and `_`.
///
/// The restricted alphabet means a key can never contain a path separator,
/// and the special names `.` and `..` are rejected, so keys are safe to use
/// verbatim as file names and coordination-service path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobKey(String);

impl BlobKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Check a raw key against the blob key alphabet.
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key != "."
        && key != ".."
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));

    if !valid {
        tracing::error!("'{}' does not appear to be a valid blob key", key);
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlobKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for BlobKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for BlobKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BlobKey> for String {
    fn from(key: BlobKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        for key in [
            "topo1",
            "wordcount-1-1700000000-stormjar.jar",
            "my_key.v2",
            "a",
            "...x",
        ] {
            assert!(BlobKey::new(key).is_ok(), "{key} should be valid");
        }
    }

    #[test]
    fn test_rejects_path_traversal_and_separators() {
        for key in [
            "", ".", "..", "../etc/passwd", "a/b", "a\\b", "with space", "tab\tkey", "ключ",
        ] {
            assert!(
                matches!(BlobKey::new(key), Err(Error::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_overlong_key() {
        assert!(BlobKey::new("k".repeat(MAX_KEY_LEN)).is_ok());
        assert!(BlobKey::new("k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let key: BlobKey = serde_json::from_str("\"topo1\"").unwrap();
        assert_eq!(key.as_str(), "topo1");
        assert!(serde_json::from_str::<BlobKey>("\"../x\"").is_err());
    }
}
