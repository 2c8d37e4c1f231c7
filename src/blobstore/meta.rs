//! Blob metadata: access control lists and replication factor

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Principal kind an ACL entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclType {
    User,
    Group,
    /// Everybody, including anonymous callers
    Other,
}

impl AclType {
    fn prefix(&self) -> &'static str {
        match self {
            AclType::User => "u",
            AclType::Group => "g",
            AclType::Other => "o",
        }
    }
}

/// Permission bits carried by an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Access(u8);

impl Access {
    pub const NONE: Access = Access(0);
    pub const READ: Access = Access(0b001);
    pub const WRITE: Access = Access(0b010);
    pub const ADMIN: Access = Access(0b100);
    pub const ALL: Access = Access(0b111);

    pub fn contains(self, other: Access) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Access) -> Access {
        Access(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Human readable verb for error messages.
    pub fn verb(self) -> &'static str {
        if self.contains(Access::ADMIN) {
            "administer"
        } else if self.contains(Access::WRITE) {
            "write"
        } else {
            "read"
        }
    }
}

impl FromStr for Access {
    type Err = Error;

    /// Parses `rwa`-style strings; `-` is a placeholder, order is free.
    fn from_str(s: &str) -> Result<Self> {
        let mut access = Access::NONE;
        for c in s.chars() {
            access = match c {
                'r' => access.union(Access::READ),
                'w' => access.union(Access::WRITE),
                'a' => access.union(Access::ADMIN),
                '-' => access,
                other => {
                    return Err(Error::Other(format!(
                        "unknown permission '{}' in access string '{}'",
                        other, s
                    )))
                }
            };
        }
        Ok(access)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.contains(Access::READ) { 'r' } else { '-' };
        let w = if self.contains(Access::WRITE) { 'w' } else { '-' };
        let a = if self.contains(Access::ADMIN) { 'a' } else { '-' };
        write!(f, "{}{}{}", r, w, a)
    }
}

/// A single ACL entry, written as `<u|g|o>:<name>:<access>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessControl {
    pub kind: AclType,
    /// Principal name; always `None` for [`AclType::Other`].
    pub name: Option<String>,
    pub access: Access,
}

impl AccessControl {
    pub fn user(name: impl Into<String>, access: Access) -> Self {
        Self {
            kind: AclType::User,
            name: Some(name.into()),
            access,
        }
    }

    pub fn group(name: impl Into<String>, access: Access) -> Self {
        Self {
            kind: AclType::Group,
            name: Some(name.into()),
            access,
        }
    }

    pub fn other(access: Access) -> Self {
        Self {
            kind: AclType::Other,
            name: None,
            access,
        }
    }

    /// Parse a comma separated list of entries.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<AccessControl>())
            .collect()
    }
}

impl FromStr for AccessControl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(Error::Other(format!(
                "access control '{}' must look like <u|g|o>:<name>:<rwa>",
                s
            )));
        }
        let access: Access = parts[2].parse()?;
        let name = parts[1].trim();
        match parts[0] {
            "u" if !name.is_empty() => Ok(Self::user(name, access)),
            "g" if !name.is_empty() => Ok(Self::group(name, access)),
            "u" | "g" => Err(Error::Other(format!(
                "access control '{}' needs a principal name",
                s
            ))),
            "o" => Ok(Self::other(access)),
            other => Err(Error::Other(format!(
                "unknown access control type '{}' in '{}'",
                other, s
            ))),
        }
    }
}

impl fmt::Display for AccessControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.kind.prefix(),
            self.name.as_deref().unwrap_or(""),
            self.access
        )
    }
}

/// Metadata a caller may set on a blob.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SettableBlobMeta {
    pub acl: Vec<AccessControl>,
    /// Desired replication factor; `None` leaves it to the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<u32>,
}

impl SettableBlobMeta {
    pub fn new(acl: Vec<AccessControl>) -> Self {
        Self {
            acl,
            replication_factor: None,
        }
    }

    /// Everybody may do everything.
    pub fn world_everything() -> Self {
        Self::new(vec![AccessControl::other(Access::ALL)])
    }

    pub fn with_replication(mut self, replication: u32) -> Self {
        self.replication_factor = Some(replication);
        self
    }
}

/// Metadata as returned to readers: the settable part plus the version marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadableBlobMeta {
    pub settable: SettableBlobMeta,
    /// Derived from the content's last modification; changes on every commit.
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_access_control() {
        let acl: AccessControl = "u:alice:rwa".parse().unwrap();
        assert_eq!(acl, AccessControl::user("alice", Access::ALL));

        let acl: AccessControl = "g:ops:r-a".parse().unwrap();
        assert_eq!(acl.kind, AclType::Group);
        assert!(acl.access.contains(Access::READ));
        assert!(!acl.access.contains(Access::WRITE));
        assert!(acl.access.contains(Access::ADMIN));

        let acl: AccessControl = "o::r--".parse().unwrap();
        assert_eq!(acl, AccessControl::other(Access::READ));
        assert_eq!(acl.to_string(), "o::r--");
    }

    #[test]
    fn test_parse_access_control_errors() {
        assert!("x:alice:rwa".parse::<AccessControl>().is_err());
        assert!("u::rwa".parse::<AccessControl>().is_err());
        assert!("u:alice:rwz".parse::<AccessControl>().is_err());
        assert!("u:alice".parse::<AccessControl>().is_err());
    }

    #[test]
    fn test_parse_list() {
        let acls = AccessControl::parse_list("u:alice:rwa, o::r--").unwrap();
        assert_eq!(acls.len(), 2);
        assert!(AccessControl::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_access_display_round_trips() {
        for s in ["---", "r--", "rw-", "rwa", "--a"] {
            let access: Access = s.parse().unwrap();
            assert_eq!(access.to_string(), s);
        }
    }

    #[test]
    fn test_meta_json_shape() {
        let meta = SettableBlobMeta::world_everything().with_replication(3);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["replication_factor"], 3);
        assert_eq!(json["acl"][0]["kind"], "other");
        let back: SettableBlobMeta = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
