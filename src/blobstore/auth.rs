//! Caller identities and ACL enforcement
//!
//! The store never decides policy itself: every operation names the caller
//! and the [`Access`] it needs, and an [`Authorizer`] answers. Internal
//! traffic (the synchronizer pulling from peers, a leader writing its own
//! state) is the [`Caller::Internal`] variant rather than a missing identity.

use crate::blobstore::key::BlobKey;
use crate::blobstore::meta::{Access, AccessControl, AclType, SettableBlobMeta};
use crate::common::{Error, Result};
use std::fmt;

/// Who is performing a blob store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Cluster-internal traffic; trusted.
    Internal,
    User { name: String, groups: Vec<String> },
    Anonymous,
}

impl Caller {
    pub fn user(name: impl Into<String>) -> Self {
        Caller::User {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    pub fn user_in_groups(name: impl Into<String>, groups: Vec<String>) -> Self {
        Caller::User {
            name: name.into(),
            groups,
        }
    }

    /// Permissions the ACL grants this caller.
    pub fn granted(&self, acl: &[AccessControl]) -> Access {
        acl.iter()
            .filter(|entry| self.matches(entry))
            .fold(Access::NONE, |acc, entry| acc.union(entry.access))
    }

    fn matches(&self, entry: &AccessControl) -> bool {
        match (entry.kind, self) {
            (AclType::Other, _) => true,
            (AclType::User, Caller::User { name, .. }) => entry.name.as_deref() == Some(name),
            (AclType::Group, Caller::User { groups, .. }) => entry
                .name
                .as_deref()
                .is_some_and(|g| groups.iter().any(|mine| mine == g)),
            _ => false,
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Internal => write!(f, "internal"),
            Caller::User { name, .. } => write!(f, "user {}", name),
            Caller::Anonymous => write!(f, "anonymous"),
        }
    }
}

pub trait Authorizer: Send + Sync {
    /// Fail with `Unauthorized` unless `caller` holds `access` on the blob.
    fn check(
        &self,
        caller: &Caller,
        key: &BlobKey,
        acl: &[AccessControl],
        access: Access,
    ) -> Result<()>;

    /// Fix up metadata for a new blob; fails if the caller would lock itself out.
    fn normalize_for_create(
        &self,
        caller: &Caller,
        key: &BlobKey,
        meta: SettableBlobMeta,
    ) -> Result<SettableBlobMeta>;
}

/// Enforces the blob's ACL entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct AclAuthorizer;

impl Authorizer for AclAuthorizer {
    fn check(
        &self,
        caller: &Caller,
        key: &BlobKey,
        acl: &[AccessControl],
        access: Access,
    ) -> Result<()> {
        if matches!(caller, Caller::Internal) || caller.granted(acl).contains(access) {
            return Ok(());
        }
        tracing::debug!("{} denied {} on {}", caller, access, key);
        Err(Error::Unauthorized {
            caller: caller.to_string(),
            key: key.to_string(),
            access: access.verb().to_string(),
        })
    }

    fn normalize_for_create(
        &self,
        caller: &Caller,
        key: &BlobKey,
        mut meta: SettableBlobMeta,
    ) -> Result<SettableBlobMeta> {
        match caller {
            Caller::Internal => {
                if meta.acl.is_empty() {
                    meta.acl = SettableBlobMeta::world_everything().acl;
                }
            }
            Caller::User { name, .. } => {
                if !caller.granted(&meta.acl).contains(Access::ALL) {
                    meta.acl.push(AccessControl::user(name.clone(), Access::ALL));
                }
            }
            Caller::Anonymous => {
                if meta.acl.is_empty() {
                    meta.acl = SettableBlobMeta::world_everything().acl;
                }
            }
        }
        self.check(caller, key, &meta.acl, Access::ADMIN)?;
        Ok(meta)
    }
}

/// No enforcement; every ACL is treated as world-everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn check(
        &self,
        _caller: &Caller,
        _key: &BlobKey,
        _acl: &[AccessControl],
        _access: Access,
    ) -> Result<()> {
        Ok(())
    }

    fn normalize_for_create(
        &self,
        _caller: &Caller,
        _key: &BlobKey,
        mut meta: SettableBlobMeta,
    ) -> Result<SettableBlobMeta> {
        if meta.acl.is_empty() {
            meta.acl = SettableBlobMeta::world_everything().acl;
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> BlobKey {
        BlobKey::new("topo1").unwrap()
    }

    #[test]
    fn test_user_and_group_matching() {
        let acl = vec![
            AccessControl::user("alice", Access::ALL),
            AccessControl::group("ops", Access::READ),
        ];
        let alice = Caller::user("alice");
        let bob = Caller::user_in_groups("bob", vec!["ops".into()]);
        let eve = Caller::user("eve");

        assert_eq!(alice.granted(&acl), Access::ALL);
        assert_eq!(bob.granted(&acl), Access::READ);
        assert_eq!(eve.granted(&acl), Access::NONE);
        assert_eq!(Caller::Anonymous.granted(&acl), Access::NONE);
    }

    #[test]
    fn test_acl_authorizer_check() {
        let auth = AclAuthorizer;
        let acl = vec![
            AccessControl::user("alice", Access::READ.union(Access::WRITE)),
            AccessControl::other(Access::READ),
        ];

        assert!(auth
            .check(&Caller::user("alice"), &key(), &acl, Access::WRITE)
            .is_ok());
        assert!(auth
            .check(&Caller::Anonymous, &key(), &acl, Access::READ)
            .is_ok());
        assert!(matches!(
            auth.check(&Caller::Anonymous, &key(), &acl, Access::WRITE),
            Err(Error::Unauthorized { .. })
        ));
        assert!(auth
            .check(&Caller::Internal, &key(), &[], Access::ADMIN)
            .is_ok());
    }

    #[test]
    fn test_normalize_grants_creator_everything() {
        let meta = SettableBlobMeta::new(vec![AccessControl::other(Access::READ)]);
        let meta = AclAuthorizer
            .normalize_for_create(&Caller::user("alice"), &key(), meta)
            .unwrap();
        assert_eq!(Caller::user("alice").granted(&meta.acl), Access::ALL);
        assert_eq!(Caller::Anonymous.granted(&meta.acl), Access::READ);
    }

    #[test]
    fn test_anonymous_cannot_create_locked_blob() {
        let meta = SettableBlobMeta::new(vec![AccessControl::user("alice", Access::ALL)]);
        let result = AclAuthorizer.normalize_for_create(&Caller::Anonymous, &key(), meta);
        assert!(matches!(result, Err(Error::Unauthorized { .. })));

        let open = AclAuthorizer
            .normalize_for_create(&Caller::Anonymous, &key(), SettableBlobMeta::default())
            .unwrap();
        assert_eq!(open, SettableBlobMeta::world_everything());
    }
}
