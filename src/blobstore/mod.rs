//! Versioned blob storage with commit-or-cancel writes

pub mod auth;
pub mod key;
pub mod local_fs;
pub mod memory;
pub mod meta;
pub mod store;
pub mod stream;

pub use auth::{AclAuthorizer, AllowAll, Authorizer, Caller};
pub use key::{validate_key, BlobKey, MAX_KEY_LEN};
pub use local_fs::LocalFsBlobStore;
pub use memory::MemBlobStore;
pub use meta::{Access, AccessControl, AclType, ReadableBlobMeta, SettableBlobMeta};
pub use store::{translate_keys, BlobStore};
pub use stream::{copy_and_commit, BlobPart, BlobReader, BlobWriter};
