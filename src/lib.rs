//! # blobsync
//!
//! A replicated blob store for the master nodes of a cluster manager:
//! - Commit-or-cancel writes, so readers never see partial content
//! - ACL-carrying metadata checked on every operation
//! - Per-key version records in a coordination service (etcd)
//! - Periodic anti-entropy: followers pull what they miss from peers
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │     Coordination service      │
//!            │ /blobstore/<key>/<host:port>-<seq>
//!            └──────┬───────────────▲────────┘
//!       publish     │               │  list / holders
//!   ┌───────────────┴──┐        ┌───┴──────────────┐
//!   │ Leader           │  HTTP  │ Follower         │
//!   │  writes + commit │◄───────┤  sync pass:      │
//!   │  publish seq+1   │  pull  │  purge, freshen, │
//!   └──────────────────┘        │  fetch, publish  │
//!                               └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! blobsync-node serve --config node.toml
//! blobsync-node serve --host nimbus-2 --port 6628 --data ./node2 \
//!   --etcd http://localhost:2379
//! ```
//!
//! ### Use the CLI
//! ```bash
//! blobsync --node http://localhost:6627 create topo-1-stormjar.jar --file ./topo.jar
//! blobsync cat topo-1-stormjar.jar --output ./copy.jar
//! blobsync set-acl topo-1-stormjar.jar u:alice:rwa,o::r--
//! blobsync list
//! ```

pub mod blobstore;
pub mod cluster;
pub mod common;
pub mod coordination;
pub mod node;
pub mod peer;
pub mod sync;

// Re-export commonly used types
pub use blobstore::{BlobKey, BlobStore, Caller, LocalFsBlobStore, MemBlobStore};
pub use cluster::NodeInfo;
pub use common::{Config, Error, Result};
pub use node::BlobNode;
pub use sync::{SyncReport, Synchronizer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
